//! The KV-backed ruleset store.
//!
//! A ruleset is partitioned across three key families under a namespace:
//!
//! ```text
//! <ns>/rulesets/rules/<path>@<version>   serialized rule list
//! <ns>/rulesets/checksums/<path>         latest pointer: version + checksum
//! <ns>/rulesets/signatures/<path>        serialized signature
//! ```
//!
//! `@` is the version separator and is forbidden in paths. The checksum
//! record detects no-change puts without decoding the rule blob and names
//! the latest version so reads never scan. Writes are single CAS
//! transactions guarded by the checksum key's mod revision, retried within
//! a small bound on conflict.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use decree_core::{eval_rules, EvalResult, Params, Rule, Ruleset, RulesetVersion, Signature};

use crate::error::StoreError;
use crate::kv::{KvBackend, KvCompare, KvPut};
use crate::service::{
    EventKind, ListOptions, RulesetEvent, RulesetPage, RulesetService, WatchResult,
};

/// CAS attempts before a put surfaces `CasRetryExhausted`.
const CAS_RETRIES: usize = 3;

/// Version ids are zero-padded so lexical key order is version order.
const VERSION_WIDTH: usize = 20;

/// Page size used for internal full scans (version history).
const SCAN_PAGE: usize = 100;

/// A [`RulesetService`] over any [`KvBackend`].
pub struct KvRulesetStore<K> {
    kv: K,
    namespace: String,
    watch_timeout: Duration,
    /// Signatures are immutable after create, so entries never go stale.
    signatures: RwLock<HashMap<String, Arc<Signature>>>,
}

/// The value of a `checksums/<path>` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LatestPointer {
    version: String,
    checksum: String,
}

impl<K: KvBackend> KvRulesetStore<K> {
    pub fn new(kv: K, namespace: impl Into<String>) -> KvRulesetStore<K> {
        KvRulesetStore {
            kv,
            namespace: namespace.into(),
            watch_timeout: Duration::from_secs(55),
            signatures: RwLock::new(HashMap::new()),
        }
    }

    /// Override the long-poll deadline of [`RulesetService::watch`].
    pub fn with_watch_timeout(mut self, timeout: Duration) -> KvRulesetStore<K> {
        self.watch_timeout = timeout;
        self
    }

    // ── Key layout ────────────────────────────────────────────────────

    fn rules_key(&self, path: &str, version: &str) -> String {
        format!("{}/rulesets/rules/{path}@{version}", self.namespace)
    }

    fn rules_prefix(&self, path: &str) -> String {
        format!("{}/rulesets/rules/{path}@", self.namespace)
    }

    /// Prefix of every rules key; the watch appends caller path prefixes.
    fn rules_root(&self) -> String {
        format!("{}/rulesets/rules/", self.namespace)
    }

    fn checksums_key(&self, path: &str) -> String {
        format!("{}/rulesets/checksums/{path}", self.namespace)
    }

    fn signatures_key(&self, path: &str) -> String {
        format!("{}/rulesets/signatures/{path}", self.namespace)
    }

    fn signatures_root(&self) -> String {
        format!("{}/rulesets/signatures/", self.namespace)
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn validate_path(path: &str) -> Result<(), StoreError> {
        let invalid = |reason| StoreError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        if path.is_empty() {
            return Err(invalid("empty"));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(invalid("leading or trailing slash"));
        }
        if path.contains('@') {
            return Err(invalid("'@' is reserved"));
        }
        Ok(())
    }

    /// Load a signature, serving repeated lookups from the cache.
    async fn signature(&self, path: &str) -> Result<Arc<Signature>, StoreError> {
        if let Some(sig) = self
            .signatures
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
        {
            return Ok(sig.clone());
        }

        let kv = self
            .kv
            .get(&self.signatures_key(path))
            .await?
            .ok_or(StoreError::RulesetNotFound)?;
        let signature: Signature = serde_json::from_slice(&kv.value)
            .map_err(|e| StoreError::Backend(format!("corrupt signature record: {e}")))?;
        let signature = Arc::new(signature);
        self.signatures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), signature.clone());
        Ok(signature)
    }

    fn cache_signature(&self, path: &str, signature: &Signature) {
        self.signatures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), Arc::new(signature.clone()));
    }

    async fn latest_pointer(&self, path: &str) -> Result<Option<LatestPointer>, StoreError> {
        match self.kv.get(&self.checksums_key(path)).await? {
            None => Ok(None),
            Some(kv) => serde_json::from_slice(&kv.value)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("corrupt checksum record: {e}"))),
        }
    }

    async fn load_rules(&self, path: &str, version: &str) -> Result<Vec<Rule>, StoreError> {
        let kv = self
            .kv
            .get(&self.rules_key(path, version))
            .await?
            .ok_or(StoreError::RulesetNotFound)?;
        decode_rules(&kv.value)
    }

    /// All versions of a path, ascending. Version ids are zero-padded, so
    /// lexical order is numeric order.
    async fn load_versions(&self, path: &str) -> Result<Vec<RulesetVersion>, StoreError> {
        let prefix = self.rules_prefix(path);
        let mut versions = Vec::new();
        let mut start_after: Option<String> = None;
        loop {
            let page = self
                .kv
                .range(&prefix, start_after.as_deref(), SCAN_PAGE, 0)
                .await?;
            for kv in &page.kvs {
                let Some(version) = kv.key.strip_prefix(&prefix) else {
                    continue;
                };
                versions.push(RulesetVersion {
                    version: version.to_string(),
                    rules: decode_rules(&kv.value)?,
                });
            }
            if !page.more {
                return Ok(versions);
            }
            start_after = page.kvs.last().map(|kv| kv.key.clone());
        }
    }
}

fn decode_rules(blob: &[u8]) -> Result<Vec<Rule>, StoreError> {
    serde_json::from_slice(blob)
        .map_err(|e| StoreError::Backend(format!("corrupt rules record: {e}")))
}

fn encode_rules(rules: &[Rule]) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(rules).map_err(|e| StoreError::Backend(format!("encode rules: {e}")))
}

fn checksum(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn render_version(n: u64) -> String {
    format!("{n:0width$}", width = VERSION_WIDTH)
}

/// The continuation cursor of a list page: opaque to callers.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cursor {
    last_path: String,
    revision: i64,
}

fn encode_cursor(last_path: &str, revision: i64) -> String {
    let json = serde_json::to_vec(&Cursor {
        last_path: last_path.to_string(),
        revision,
    })
    .unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_cursor(token: &str) -> Result<Cursor, StoreError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StoreError::InvalidCursor)?;
    serde_json::from_slice(&raw).map_err(|_| StoreError::InvalidCursor)
}

#[async_trait]
impl<K: KvBackend> RulesetService for KvRulesetStore<K> {
    async fn create(&self, path: &str, signature: &Signature) -> Result<(), StoreError> {
        Self::validate_path(path)?;
        signature
            .validate()
            .map_err(|e| StoreError::Validation(vec![e]))?;

        let blob = serde_json::to_vec(signature)
            .map_err(|e| StoreError::Backend(format!("encode signature: {e}")))?;
        let result = self
            .kv
            .put_txn(
                &[KvCompare {
                    key: self.signatures_key(path),
                    mod_revision: 0,
                }],
                &[KvPut {
                    key: self.signatures_key(path),
                    value: blob,
                }],
            )
            .await?;

        if !result.succeeded {
            return Err(StoreError::AlreadyExists);
        }
        self.cache_signature(path, signature);
        debug!(path, "created ruleset");
        Ok(())
    }

    async fn put(&self, path: &str, rules: &[Rule]) -> Result<String, StoreError> {
        Self::validate_path(path)?;

        for attempt in 0..CAS_RETRIES {
            let signature = self.signature(path).await?;
            signature
                .check_rules(rules)
                .map_err(StoreError::Validation)?;

            let blob = encode_rules(rules)?;
            let sum = checksum(&blob);

            let (observed_revision, version) = match self.kv.get(&self.checksums_key(path)).await? {
                Some(kv) => {
                    let pointer: LatestPointer = serde_json::from_slice(&kv.value)
                        .map_err(|e| StoreError::Backend(format!("corrupt checksum record: {e}")))?;
                    if pointer.checksum == sum {
                        return Err(StoreError::NotModified);
                    }
                    let current = pointer.version.parse::<u64>().unwrap_or(0);
                    (kv.mod_revision, render_version(current + 1))
                }
                None => (0, render_version(1)),
            };

            let pointer = serde_json::to_vec(&LatestPointer {
                version: version.clone(),
                checksum: sum,
            })
            .map_err(|e| StoreError::Backend(format!("encode checksum record: {e}")))?;

            let result = self
                .kv
                .put_txn(
                    &[KvCompare {
                        key: self.checksums_key(path),
                        mod_revision: observed_revision,
                    }],
                    &[
                        KvPut {
                            key: self.rules_key(path, &version),
                            value: blob,
                        },
                        KvPut {
                            key: self.checksums_key(path),
                            value: pointer,
                        },
                    ],
                )
                .await?;

            if result.succeeded {
                debug!(path, version = %version, revision = result.revision, "put ruleset version");
                return Ok(version);
            }
            warn!(path, attempt, "concurrent write detected, retrying put");
        }

        Err(StoreError::CasRetryExhausted(CAS_RETRIES))
    }

    async fn get(&self, path: &str, version: Option<&str>) -> Result<Ruleset, StoreError> {
        Self::validate_path(path)?;
        let signature = self.signature(path).await?;

        let versions = match version {
            Some(version) => vec![RulesetVersion {
                version: version.to_string(),
                rules: self.load_rules(path, version).await?,
            }],
            None => match self.latest_pointer(path).await? {
                // Created but never put: a ruleset with no versions.
                None => Vec::new(),
                Some(pointer) => vec![RulesetVersion {
                    rules: self.load_rules(path, &pointer.version).await?,
                    version: pointer.version,
                }],
            },
        };

        Ok(Ruleset {
            path: path.to_string(),
            signature: (*signature).clone(),
            versions,
        })
    }

    async fn list(&self, prefix: &str, opts: &ListOptions) -> Result<RulesetPage, StoreError> {
        let limit = opts.clamped_limit();
        let root = self.signatures_root();

        let (start_after, pinned) = if opts.cursor.is_empty() {
            (None, 0)
        } else {
            let cursor = decode_cursor(&opts.cursor)?;
            (
                Some(self.signatures_key(&cursor.last_path)),
                cursor.revision,
            )
        };

        let page = self
            .kv
            .range(
                &format!("{root}{prefix}"),
                start_after.as_deref(),
                limit,
                pinned,
            )
            .await?;
        let revision = if pinned > 0 { pinned } else { page.revision };

        let mut rulesets = Vec::with_capacity(page.kvs.len());
        for kv in &page.kvs {
            let Some(path) = kv.key.strip_prefix(&root) else {
                continue;
            };
            let signature: Signature = serde_json::from_slice(&kv.value)
                .map_err(|e| StoreError::Backend(format!("corrupt signature record: {e}")))?;

            let versions = if opts.paths_only {
                Vec::new()
            } else if opts.all_versions {
                self.load_versions(path).await?
            } else {
                match self.latest_pointer(path).await? {
                    None => Vec::new(),
                    Some(pointer) => vec![RulesetVersion {
                        rules: self.load_rules(path, &pointer.version).await?,
                        version: pointer.version,
                    }],
                }
            };

            rulesets.push(Ruleset {
                path: path.to_string(),
                signature,
                versions,
            });
        }

        let continue_token = if page.more {
            match rulesets.last() {
                Some(last) => encode_cursor(&last.path, revision),
                None => String::new(),
            }
        } else {
            String::new()
        };

        Ok(RulesetPage {
            rulesets,
            revision,
            continue_token,
        })
    }

    async fn watch(
        &self,
        prefixes: &[String],
        since_revision: i64,
    ) -> Result<WatchResult, StoreError> {
        let from = if since_revision < 0 {
            self.kv.current_revision().await? + 1
        } else {
            since_revision + 1
        };

        // An empty prefix list watches everything.
        let roots: Vec<String> = if prefixes.is_empty() {
            vec![self.rules_root()]
        } else {
            prefixes
                .iter()
                .map(|p| format!("{}{p}", self.rules_root()))
                .collect()
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        for root in roots {
            let mut stream = self.kv.watch(&root, from).await?;
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(item) = stream.recv().await {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let rules_root = self.rules_root();
        let mut events = Vec::new();
        let mut revision = from - 1;

        let deadline = tokio::time::sleep(self.watch_timeout);
        tokio::pin!(deadline);

        let first = tokio::select! {
            _ = &mut deadline => {
                return Ok(WatchResult {
                    events,
                    revision,
                    timed_out: true,
                });
            }
            item = rx.recv() => item,
        };

        let mut pending = match first {
            None => return Err(StoreError::Backend("watch stream closed".to_string())),
            Some(item) => vec![item],
        };
        // Drain whatever arrived in the same burst before answering.
        while let Ok(item) = rx.try_recv() {
            pending.push(item);
        }

        for item in pending {
            let event = item?;
            revision = revision.max(event.revision);
            let Some(rest) = event.key.strip_prefix(&rules_root) else {
                continue;
            };
            let Some((path, version)) = rest.split_once('@') else {
                continue;
            };
            events.push(RulesetEvent {
                kind: EventKind::Put,
                path: path.to_string(),
                version: version.to_string(),
                rules: decode_rules(&event.value)?,
            });
        }

        Ok(WatchResult {
            events,
            revision,
            timed_out: false,
        })
    }

    async fn eval(
        &self,
        path: &str,
        version: Option<&str>,
        params: &(dyn Params + Sync),
    ) -> Result<EvalResult, StoreError> {
        let ruleset = self.get(path, version).await?;
        let latest = match ruleset.latest() {
            Some(version) => version,
            // No versions yet: nothing can match.
            None => return Err(StoreError::Eval(decree_core::EvalError::NoMatch)),
        };

        let value = eval_rules(&latest.rules, params)?;
        Ok(EvalResult {
            value,
            version: latest.version.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_render_zero_padded() {
        assert_eq!(render_version(1), "00000000000000000001");
        assert_eq!(render_version(42).len(), VERSION_WIDTH);
        // Lexical order is numeric order.
        assert!(render_version(2) < render_version(10));
    }

    #[test]
    fn cursor_round_trips() {
        let token = encode_cursor("a/b", 17);
        let cursor = decode_cursor(&token).unwrap();
        assert_eq!(cursor.last_path, "a/b");
        assert_eq!(cursor.revision, 17);
    }

    #[test]
    fn mutated_cursors_are_rejected() {
        assert!(matches!(
            decode_cursor("definitely-not-a-cursor!"),
            Err(StoreError::InvalidCursor)
        ));
        let token = encode_cursor("a/b", 17);
        let truncated = &token[..token.len() - 4];
        assert!(matches!(
            decode_cursor(truncated),
            Err(StoreError::InvalidCursor)
        ));
    }

    #[test]
    fn path_validation() {
        assert!(KvRulesetStore::<crate::mem::MemKv>::validate_path("a/b/c").is_ok());
        for bad in ["", "/a", "a/", "a@b"] {
            assert!(
                KvRulesetStore::<crate::mem::MemKv>::validate_path(bad).is_err(),
                "{bad:?} should be invalid"
            );
        }
    }

    #[test]
    fn checksums_are_stable_hex() {
        let sum = checksum(b"hello");
        assert_eq!(sum.len(), 64);
        assert_eq!(sum, checksum(b"hello"));
        assert_ne!(sum, checksum(b"world"));
    }
}
