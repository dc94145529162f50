//! Snapshot loader: reads a JSON mapping of paths to rulesets and pushes
//! them through the public service API.
//!
//! Existing rulesets and unchanged rule lists are tolerated, so a snapshot
//! can be re-applied idempotently.

use std::collections::BTreeMap;
use std::io::Read;

use serde::Deserialize;
use tracing::info;

use decree_core::{Rule, Signature};
use decree_storage::{RulesetService, StoreError};

/// One ruleset of a snapshot file.
#[derive(Debug, Deserialize)]
pub struct SnapshotRuleset {
    pub signature: Signature,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// What a snapshot load did.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub written: usize,
    pub unchanged: usize,
}

/// Apply a `{path → ruleset}` snapshot through the service.
pub async fn load_snapshot(
    service: &dyn RulesetService,
    mut reader: impl Read,
) -> Result<LoadReport, Box<dyn std::error::Error>> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    let snapshot: BTreeMap<String, SnapshotRuleset> = serde_json::from_str(&raw)?;

    let mut report = LoadReport::default();
    for (path, ruleset) in &snapshot {
        let path = path.trim().trim_matches('/');
        if path.is_empty() {
            return Err("empty path in snapshot".into());
        }

        match service.create(path, &ruleset.signature).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {}
            Err(e) => return Err(e.into()),
        }

        match service.put(path, &ruleset.rules).await {
            Ok(version) => {
                info!(path, version = %version, "ruleset saved");
                report.written += 1;
            }
            Err(StoreError::NotModified) => {
                report.unchanged += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(report)
}
