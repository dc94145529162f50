//! etcd-backed [`KvBackend`].
//!
//! Maps the backend trait onto `etcd-client`: CAS transactions become
//! `Txn` guards on mod revisions, range reads become prefix `Get`s with
//! an exclusive start key, and watches become prefix watch streams with a
//! start revision.

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::kv::{KeyValue, KvBackend, KvCompare, KvEvent, KvEventStream, KvPut, RangeResult, TxnResult};

/// A [`KvBackend`] over an etcd cluster.
#[derive(Clone)]
pub struct EtcdKv {
    client: Client,
}

impl EtcdKv {
    /// Connect to the given endpoints.
    pub async fn connect(endpoints: &[String]) -> Result<EtcdKv, StoreError> {
        let client = Client::connect(endpoints, Some(ConnectOptions::new()))
            .await
            .map_err(map_err)?;
        debug!(?endpoints, "connected to etcd");
        Ok(EtcdKv { client })
    }

    // etcd-client operations take `&mut self`; the client is a cheap
    // handle over a shared connection, so each call clones it.
    fn client(&self) -> Client {
        self.client.clone()
    }
}

fn map_err(err: etcd_client::Error) -> StoreError {
    let text = err.to_string();
    if text.contains("compacted") {
        StoreError::CompactedRevision
    } else {
        StoreError::Backend(text)
    }
}

fn header_revision(header: Option<&etcd_client::ResponseHeader>) -> Result<i64, StoreError> {
    header
        .map(|h| h.revision())
        .ok_or_else(|| StoreError::Backend("etcd response without header".to_string()))
}

/// The first key lexically past every key under `prefix`.
fn prefix_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // Prefix of all 0xff bytes (or empty): open-ended range.
    vec![0]
}

fn decode_kv(kv: &etcd_client::KeyValue) -> Result<KeyValue, StoreError> {
    Ok(KeyValue {
        key: kv
            .key_str()
            .map_err(|e| StoreError::Backend(format!("non-UTF-8 key: {e}")))?
            .to_string(),
        value: kv.value().to_vec(),
        mod_revision: kv.mod_revision(),
    })
}

#[async_trait]
impl KvBackend for EtcdKv {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let resp = self.client().get(key, None).await.map_err(map_err)?;
        resp.kvs().first().map(decode_kv).transpose()
    }

    async fn range(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
        at_revision: i64,
    ) -> Result<RangeResult, StoreError> {
        let mut options = GetOptions::new().with_limit(limit as i64);
        if at_revision > 0 {
            options = options.with_revision(at_revision);
        }

        // Exclusive start: one byte past `start_after`, bounded by the end
        // of the prefix range.
        let start: Vec<u8> = match start_after {
            Some(after) => {
                let mut key = after.as_bytes().to_vec();
                key.push(0);
                key
            }
            None => prefix.as_bytes().to_vec(),
        };
        options = options.with_range(prefix_end(prefix));

        let resp = self
            .client()
            .get(start, Some(options))
            .await
            .map_err(map_err)?;

        let kvs = resp
            .kvs()
            .iter()
            .map(decode_kv)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RangeResult {
            kvs,
            revision: header_revision(resp.header())?,
            more: resp.more(),
        })
    }

    async fn put_txn(
        &self,
        compares: &[KvCompare],
        puts: &[KvPut],
    ) -> Result<TxnResult, StoreError> {
        let guards: Vec<Compare> = compares
            .iter()
            .map(|c| Compare::mod_revision(c.key.as_str(), CompareOp::Equal, c.mod_revision))
            .collect();
        let writes: Vec<TxnOp> = puts
            .iter()
            .map(|p| TxnOp::put(p.key.as_str(), p.value.clone(), None))
            .collect();

        let txn = Txn::new().when(guards).and_then(writes);
        let resp = self.client().txn(txn).await.map_err(map_err)?;
        Ok(TxnResult {
            succeeded: resp.succeeded(),
            revision: header_revision(resp.header())?,
        })
    }

    async fn watch(&self, prefix: &str, from_revision: i64) -> Result<KvEventStream, StoreError> {
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(from_revision);
        let (mut watcher, mut stream) = self
            .client()
            .watch(prefix, Some(options))
            .await
            .map_err(map_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let message = match stream.message().await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(map_err(e)));
                        break;
                    }
                };

                if message.compact_revision() > 0 {
                    let _ = tx.send(Err(StoreError::CompactedRevision));
                    break;
                }

                for event in message.events() {
                    if event.event_type() != EventType::Put {
                        continue;
                    }
                    let Some(kv) = event.kv() else { continue };
                    let item = decode_kv(kv).map(|kv| KvEvent {
                        revision: kv.mod_revision,
                        key: kv.key,
                        value: kv.value,
                    });
                    if tx.send(item).is_err() {
                        // Receiver gone: the long-poll ended.
                        let _ = watcher.cancel().await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn current_revision(&self) -> Result<i64, StoreError> {
        // Any read returns the cluster revision in its header; count-only
        // keeps it free of payload.
        let resp = self
            .client()
            .get("\0", Some(GetOptions::new().with_count_only()))
            .await
            .map_err(map_err)?;
        header_revision(resp.header())
    }
}
