//! The ruleset service trait and its request/response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use decree_core::{EvalResult, Params, Rule, Ruleset, Signature};

use crate::error::StoreError;

/// Versioned CRUD over rulesets.
///
/// ## Versioning
///
/// `put` appends a new version iff the proposed rules differ structurally
/// from the current latest; an identical list reports `NotModified` and
/// leaves state unchanged. Versions are never mutated in place and never
/// deleted.
///
/// ## Concurrency
///
/// Implementations must tolerate concurrent writers without locks: writes
/// are atomic compare-and-swap transactions, retried within a small bound
/// on conflict. Reads return immutable snapshots.
///
/// ## Cancellation
///
/// Every method suspends only on the backing store. Dropping the returned
/// future aborts the outstanding KV operation; no partial state is ever
/// left behind.
#[async_trait]
pub trait RulesetService: Send + Sync {
    /// Create a new ruleset with the given signature and no versions.
    async fn create(&self, path: &str, signature: &Signature) -> Result<(), StoreError>;

    /// Append a new version holding `rules`. Returns the new version id,
    /// or `NotModified` when the rules equal the current latest.
    async fn put(&self, path: &str, rules: &[Rule]) -> Result<String, StoreError>;

    /// Fetch a snapshot of one version (the latest when `version` is
    /// `None`).
    async fn get(&self, path: &str, version: Option<&str>) -> Result<Ruleset, StoreError>;

    /// List rulesets whose path starts with `prefix`, in lexical order,
    /// paginated through an opaque cursor.
    async fn list(&self, prefix: &str, opts: &ListOptions) -> Result<RulesetPage, StoreError>;

    /// Long-poll for changes under the given path prefixes, starting just
    /// after `since_revision` (`-1` = the store's current revision).
    /// Returns on the first event batch or on the internal deadline
    /// (`timed_out` set, no events).
    async fn watch(&self, prefixes: &[String], since_revision: i64)
        -> Result<WatchResult, StoreError>;

    /// Evaluate a ruleset version (latest when `None`) against a params
    /// bag, returning the first matching rule's result.
    async fn eval(
        &self,
        path: &str,
        version: Option<&str>,
        params: &(dyn Params + Sync),
    ) -> Result<EvalResult, StoreError>;
}

/// Options accepted by [`RulesetService::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Page size. `0` means the default of 50; values are clamped to
    /// `[1, 100]`.
    pub limit: usize,
    /// Opaque continuation cursor from a previous page.
    pub cursor: String,
    /// Omit rule bodies, returning paths and signatures only.
    pub paths_only: bool,
    /// Include the full version history of each ruleset.
    pub all_versions: bool,
}

impl ListOptions {
    pub(crate) fn clamped_limit(&self) -> usize {
        if self.limit == 0 {
            50
        } else {
            self.limit.min(100)
        }
    }
}

/// One page of a ruleset listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetPage {
    pub rulesets: Vec<Ruleset>,
    /// The snapshot revision the page was read at.
    pub revision: i64,
    /// Cursor of the next page, empty when this is the last one.
    #[serde(rename = "continue", default, skip_serializing_if = "String::is_empty")]
    pub continue_token: String,
}

/// The kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "PUT")]
    Put,
}

/// A change to a ruleset, delivered through [`RulesetService::watch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub path: String,
    pub version: String,
    pub rules: Vec<Rule>,
}

/// The outcome of one long-poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchResult {
    pub events: Vec<RulesetEvent>,
    /// The revision of the last delivered event, usable as the next
    /// `since_revision` cursor.
    pub revision: i64,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        let mut opts = ListOptions::default();
        assert_eq!(opts.clamped_limit(), 50);
        opts.limit = 7;
        assert_eq!(opts.clamped_limit(), 7);
        opts.limit = 500;
        assert_eq!(opts.clamped_limit(), 100);
    }

    #[test]
    fn event_kind_serializes_as_put() {
        assert_eq!(serde_json::to_string(&EventKind::Put).unwrap(), "\"PUT\"");
    }
}
