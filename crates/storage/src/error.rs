use decree_core::EvalError;

/// All errors that can be returned by a ruleset service or KV backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No ruleset exists under the requested path (or version).
    #[error("ruleset not found")]
    RulesetNotFound,

    /// The ruleset exists but its signature record is missing.
    #[error("signature not found")]
    SignatureNotFound,

    /// A ruleset already exists under this path.
    #[error("already exists")]
    AlreadyExists,

    /// The proposed rules are identical to the current latest version;
    /// nothing was written.
    #[error("not modified")]
    NotModified,

    /// The list continuation cursor is not one this store issued.
    #[error("invalid cursor")]
    InvalidCursor,

    /// The requested revision is older than the store's compacted horizon.
    #[error("revision has been compacted")]
    CompactedRevision,

    /// Concurrent writers kept invalidating the compare-and-swap; the
    /// bounded retry loop gave up.
    #[error("write conflict persisted after {0} retries")]
    CasRetryExhausted(usize),

    /// The path is not a valid slash-separated identifier.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The rules or signature failed validation. Accumulated: one entry
    /// per violation across the whole batch.
    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<decree_core::Error>),

    /// Evaluation against the stored ruleset failed.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// A backend-specific error (connection, serialization, stream).
    #[error("storage backend error: {0}")]
    Backend(String),
}

fn format_errors(errors: &[decree_core::Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
