//! decree-storage: versioned ruleset persistence over a consistent KV
//! store.
//!
//! The [`RulesetService`] trait defines the operations the HTTP façade and
//! the loader consume; [`KvRulesetStore`] implements it over any
//! [`KvBackend`]. Two backends ship: [`EtcdKv`] for production and
//! [`MemKv`] for tests and local development.

pub mod engine;
pub mod error;
pub mod etcd;
pub mod kv;
pub mod mem;
pub mod service;
pub mod store;

pub use engine::Engine;
pub use error::StoreError;
pub use etcd::EtcdKv;
pub use kv::KvBackend;
pub use mem::MemKv;
pub use service::{
    EventKind, ListOptions, RulesetEvent, RulesetPage, RulesetService, WatchResult,
};
pub use store::KvRulesetStore;
