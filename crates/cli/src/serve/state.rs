//! Application state shared across request handlers.

use std::sync::Arc;

use decree_storage::RulesetService;

/// Shared state: the ruleset service behind the HTTP surface.
pub(crate) struct AppState {
    pub(crate) rulesets: Arc<dyn RulesetService>,
}

impl AppState {
    pub(crate) fn new(rulesets: Arc<dyn RulesetService>) -> AppState {
        AppState { rulesets }
    }
}
