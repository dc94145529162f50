//! In-memory KV backend.
//!
//! A faithful miniature of the consistent store: a single revision counter,
//! per-key mod revisions, CAS transactions, and revision-cursored watches
//! replayed from an in-memory change log. Used by the test suites and by
//! local development; production deployments use [`crate::etcd::EtcdKv`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::StoreError;
use crate::kv::{KeyValue, KvBackend, KvCompare, KvEvent, KvEventStream, KvPut, RangeResult, TxnResult};

struct MemState {
    revision: i64,
    /// Watches may not start at or below this revision.
    compacted: i64,
    kvs: BTreeMap<String, (Vec<u8>, i64)>,
    /// Every put ever applied, in revision order, for watch replay.
    log: Vec<KvEvent>,
}

/// An in-memory [`KvBackend`].
#[derive(Clone)]
pub struct MemKv {
    state: Arc<Mutex<MemState>>,
    changes: broadcast::Sender<KvEvent>,
}

impl Default for MemKv {
    fn default() -> Self {
        MemKv::new()
    }
}

impl MemKv {
    pub fn new() -> MemKv {
        let (changes, _) = broadcast::channel(256);
        MemKv {
            state: Arc::new(Mutex::new(MemState {
                revision: 0,
                compacted: 0,
                kvs: BTreeMap::new(),
                log: Vec::new(),
            })),
            changes,
        }
    }

    /// Discard watch history at and below `revision`, simulating store
    /// compaction.
    pub fn compact(&self, revision: i64) {
        let mut state = self.lock();
        state.compacted = state.compacted.max(revision);
        state.log.retain(|ev| ev.revision > revision);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        // A poisoned lock means a panicked test thread; propagate the data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KvBackend for MemKv {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let state = self.lock();
        Ok(state.kvs.get(key).map(|(value, rev)| KeyValue {
            key: key.to_string(),
            value: value.clone(),
            mod_revision: *rev,
        }))
    }

    async fn range(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
        _at_revision: i64,
    ) -> Result<RangeResult, StoreError> {
        // The in-memory backend serves the current view; revision pinning
        // is honoured by the etcd backend.
        let state = self.lock();
        let mut kvs = Vec::new();
        let mut more = false;
        for (key, (value, rev)) in state.kvs.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(after) = start_after {
                if key.as_str() <= after {
                    continue;
                }
            }
            if kvs.len() == limit {
                more = true;
                break;
            }
            kvs.push(KeyValue {
                key: key.clone(),
                value: value.clone(),
                mod_revision: *rev,
            });
        }
        Ok(RangeResult {
            kvs,
            revision: state.revision,
            more,
        })
    }

    async fn put_txn(
        &self,
        compares: &[KvCompare],
        puts: &[KvPut],
    ) -> Result<TxnResult, StoreError> {
        let mut state = self.lock();

        for compare in compares {
            let current = state
                .kvs
                .get(&compare.key)
                .map(|(_, rev)| *rev)
                .unwrap_or(0);
            if current != compare.mod_revision {
                return Ok(TxnResult {
                    succeeded: false,
                    revision: state.revision,
                });
            }
        }

        state.revision += 1;
        let revision = state.revision;
        for put in puts {
            state
                .kvs
                .insert(put.key.clone(), (put.value.clone(), revision));
            let event = KvEvent {
                key: put.key.clone(),
                value: put.value.clone(),
                revision,
            };
            state.log.push(event.clone());
            // Fan out while holding the lock so a subscriber registered
            // under the same lock never misses an event.
            let _ = self.changes.send(event);
        }

        Ok(TxnResult {
            succeeded: true,
            revision,
        })
    }

    async fn watch(&self, prefix: &str, from_revision: i64) -> Result<KvEventStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let (mut live, from) = {
            let state = self.lock();
            if from_revision <= state.compacted {
                let _ = tx.send(Err(StoreError::CompactedRevision));
                return Ok(rx);
            }
            // Replay the backlog, then hand over to the live feed. The
            // replay, the subscription and the cutover revision are all
            // taken under one lock, so no event can fall in between or be
            // delivered twice.
            for event in &state.log {
                if event.revision >= from_revision && event.key.starts_with(prefix) {
                    let _ = tx.send(Ok(event.clone()));
                }
            }
            (self.changes.subscribe(), (state.revision + 1).max(from_revision))
        };

        let prefix = prefix.to_string();
        tokio::spawn(async move {
            loop {
                match live.recv().await {
                    Ok(event) => {
                        if event.revision >= from && event.key.starts_with(&prefix) {
                            if tx.send(Ok(event)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let _ = tx.send(Err(StoreError::Backend(
                            "watch fell behind the change feed".to_string(),
                        )));
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn current_revision(&self) -> Result<i64, StoreError> {
        Ok(self.lock().revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> KvPut {
        KvPut {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn txn_bumps_one_revision_per_commit() {
        let kv = MemKv::new();
        let r1 = kv.put_txn(&[], &[put("a", "1"), put("b", "1")]).await.unwrap();
        assert!(r1.succeeded);
        assert_eq!(r1.revision, 1);
        let a = kv.get("a").await.unwrap().unwrap();
        let b = kv.get("b").await.unwrap().unwrap();
        assert_eq!(a.mod_revision, 1);
        assert_eq!(b.mod_revision, 1);
    }

    #[tokio::test]
    async fn cas_guards_hold() {
        let kv = MemKv::new();
        kv.put_txn(&[], &[put("a", "1")]).await.unwrap();

        // Key must not exist: fails now.
        let r = kv
            .put_txn(
                &[KvCompare {
                    key: "a".to_string(),
                    mod_revision: 0,
                }],
                &[put("a", "2")],
            )
            .await
            .unwrap();
        assert!(!r.succeeded);

        // Correct mod revision: succeeds.
        let r = kv
            .put_txn(
                &[KvCompare {
                    key: "a".to_string(),
                    mod_revision: 1,
                }],
                &[put("a", "2")],
            )
            .await
            .unwrap();
        assert!(r.succeeded);
    }

    #[tokio::test]
    async fn range_paginates_in_key_order() {
        let kv = MemKv::new();
        for key in ["p/a", "p/b", "p/c", "q/x"] {
            kv.put_txn(&[], &[put(key, "v")]).await.unwrap();
        }

        let page = kv.range("p/", None, 2, 0).await.unwrap();
        assert_eq!(
            page.kvs.iter().map(|kv| kv.key.as_str()).collect::<Vec<_>>(),
            vec!["p/a", "p/b"]
        );
        assert!(page.more);

        let rest = kv.range("p/", Some("p/b"), 2, 0).await.unwrap();
        assert_eq!(
            rest.kvs.iter().map(|kv| kv.key.as_str()).collect::<Vec<_>>(),
            vec!["p/c"]
        );
        assert!(!rest.more);
    }

    #[tokio::test]
    async fn watch_replays_backlog_and_follows_live_changes() {
        let kv = MemKv::new();
        kv.put_txn(&[], &[put("w/a", "1")]).await.unwrap();

        let mut stream = kv.watch("w/", 1).await.unwrap();
        let backlog = stream.recv().await.unwrap().unwrap();
        assert_eq!(backlog.key, "w/a");

        kv.put_txn(&[], &[put("w/b", "2")]).await.unwrap();
        let live = stream.recv().await.unwrap().unwrap();
        assert_eq!(live.key, "w/b");
        assert_eq!(live.revision, 2);
    }

    #[tokio::test]
    async fn watch_from_compacted_revision_errors() {
        let kv = MemKv::new();
        kv.put_txn(&[], &[put("a", "1")]).await.unwrap();
        kv.compact(1);

        let mut stream = kv.watch("", 1).await.unwrap();
        assert!(matches!(
            stream.recv().await.unwrap(),
            Err(StoreError::CompactedRevision)
        ));
    }
}
