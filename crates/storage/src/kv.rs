//! The minimal consistent-KV capability the ruleset store builds on:
//! point reads, lexical range reads, transactional compare-and-swap
//! writes, and revision-cursored change watches.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;

/// One stored key/value pair.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// The store revision at which the key was last written.
    pub mod_revision: i64,
}

/// The result of a range read.
#[derive(Debug, Clone)]
pub struct RangeResult {
    /// Matching pairs in lexical key order.
    pub kvs: Vec<KeyValue>,
    /// The revision the range was read at.
    pub revision: i64,
    /// More keys remain past the limit.
    pub more: bool,
}

/// A guard of a transactional write: the key's current mod revision must
/// equal `mod_revision` (`0` = the key must not exist).
#[derive(Debug, Clone)]
pub struct KvCompare {
    pub key: String,
    pub mod_revision: i64,
}

/// One write of a transaction.
#[derive(Debug, Clone)]
pub struct KvPut {
    pub key: String,
    pub value: Vec<u8>,
}

/// The outcome of a transactional write.
#[derive(Debug, Clone, Copy)]
pub struct TxnResult {
    pub succeeded: bool,
    /// The store revision after the transaction.
    pub revision: i64,
}

/// One change observed by a watch.
#[derive(Debug, Clone)]
pub struct KvEvent {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: i64,
}

/// The delivery channel of a watch. Dropping the receiver tears the watch
/// down. A compacted start revision is delivered as an `Err` item.
pub type KvEventStream = mpsc::UnboundedReceiver<Result<KvEvent, StoreError>>;

/// A consistent KV store with CAS transactions, range reads and watches.
///
/// Implementations must be `Send + Sync + 'static` so the store can be
/// shared across request handlers.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Read one key.
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Read keys under `prefix` in lexical order, starting strictly after
    /// `start_after` when given, up to `limit` pairs. `at_revision`
    /// pins the read to a snapshot (`0` = current).
    async fn range(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
        at_revision: i64,
    ) -> Result<RangeResult, StoreError>;

    /// Atomically apply `puts` iff every compare holds. All writes of a
    /// successful transaction share one revision.
    async fn put_txn(&self, compares: &[KvCompare], puts: &[KvPut])
        -> Result<TxnResult, StoreError>;

    /// Stream changes to keys under `prefix`, starting at `from_revision`
    /// (inclusive).
    async fn watch(&self, prefix: &str, from_revision: i64) -> Result<KvEventStream, StoreError>;

    /// The store's current revision.
    async fn current_revision(&self) -> Result<i64, StoreError>;
}
