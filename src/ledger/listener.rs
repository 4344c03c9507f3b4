//! Ledger event feed.
//!
//! Consumes the adaptor's WebSocket stream and records every event
//! durably in the store: commit outcomes under `tx:result:*`, batch
//! payloads under `tx:batch:*`, and the txid in the `events:pending` set
//! that wakes the result handler. The store, not process memory, is the
//! source of truth: REST and workers may span processes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::store::{keys, Store, StoreError, StoreOp};

use super::{LedgerEvent, LEDGER_SUCCESS};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub struct EventListener {
    store: Arc<dyn Store>,
    url: String,
}

impl EventListener {
    pub fn new(store: Arc<dyn Store>, url: &str) -> Self {
        Self {
            store,
            url: url.to_string(),
        }
    }

    /// Connect-and-read loop; reconnects with a fixed delay on any
    /// disconnect or connect failure.
    pub async fn run(self) {
        loop {
            tracing::info!("connecting to ledger event feed at {}", self.url);
            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    tracing::info!("ledger event feed connected");
                    let (_, mut read) = ws_stream.split();

                    while let Some(msg) = read.next().await {
                        match msg {
                            Ok(Message::Text(text)) => {
                                self.handle_message(&text).await;
                            }
                            Ok(Message::Close(_)) => {
                                tracing::warn!("ledger event feed closed by peer");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!("ledger event feed error: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("ledger event feed connect failed: {}", e);
                }
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn handle_message(&self, text: &str) {
        // Malformed payloads are discarded, not fatal.
        let event: LedgerEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("discarding malformed ledger event: {}", e);
                return;
            }
        };

        if let Err(e) = record_event(self.store.as_ref(), &event).await {
            tracing::warn!("failed to record ledger event: {}", e);
        }
    }
}

/// Write one ledger event into the store and enqueue its txid for the
/// result handler. Txids already applied stay parked in
/// `events:handled`, so re-delivery cannot re-trigger application.
pub async fn record_event(store: &dyn Store, event: &LedgerEvent) -> Result<(), StoreError> {
    match event {
        LedgerEvent::Block { txids } => {
            for txid in txids {
                tracing::debug!(%txid, "ledger block commit");
                enqueue(store, txid, StoreOp::Set {
                    key: keys::tx_result(txid),
                    value: LEDGER_SUCCESS.to_string(),
                })
                .await?;
            }
            Ok(())
        }
        LedgerEvent::Rejection { txid, error_msg } => {
            tracing::debug!(%txid, error = %error_msg, "ledger rejection");
            enqueue(store, txid, StoreOp::Set {
                key: keys::tx_result(txid),
                value: error_msg.clone(),
            })
            .await
        }
        LedgerEvent::Chaincode { txid, payload } => {
            tracing::debug!(%txid, event = %payload.event_name, "ledger contract event");
            let value = serde_json::to_string(payload).map_err(|source| StoreError::Codec {
                key: keys::tx_batch(txid),
                source,
            })?;
            enqueue(store, txid, StoreOp::Set {
                key: keys::tx_batch(txid),
                value,
            })
            .await
        }
    }
}

async fn enqueue(store: &dyn Store, txid: &str, record: StoreOp) -> Result<(), StoreError> {
    if store.set_contains(keys::EVENTS_HANDLED, txid).await? {
        return Ok(());
    }
    store
        .pipeline(vec![
            record,
            StoreOp::SetAdd {
                key: keys::EVENTS_PENDING.to_string(),
                member: txid.to_string(),
            },
        ])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BatchResult;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn block_and_chaincode_events_join_under_one_txid() {
        let store = MemoryStore::new();

        record_event(
            &store,
            &LedgerEvent::Block {
                txids: vec!["tx-1".to_string()],
            },
        )
        .await
        .unwrap();
        record_event(
            &store,
            &LedgerEvent::Chaincode {
                txid: "tx-1".to_string(),
                payload: BatchResult {
                    event_name: "chaincode_lock".to_string(),
                    src_method: "lock".to_string(),
                    success: vec!["o-1".to_string()],
                    fail: vec![],
                },
            },
        )
        .await
        .unwrap();

        assert_eq!(
            store.get(&keys::tx_result("tx-1")).await.unwrap().as_deref(),
            Some(LEDGER_SUCCESS)
        );
        assert!(store.get(&keys::tx_batch("tx-1")).await.unwrap().is_some());
        assert!(store
            .set_contains(keys::EVENTS_PENDING, "tx-1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn handled_txids_are_not_requeued() {
        let store = MemoryStore::new();
        store.set_add(keys::EVENTS_HANDLED, "tx-9").await.unwrap();

        record_event(
            &store,
            &LedgerEvent::Block {
                txids: vec!["tx-9".to_string()],
            },
        )
        .await
        .unwrap();

        assert!(!store
            .set_contains(keys::EVENTS_PENDING, "tx-9")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rejection_records_error_text() {
        let store = MemoryStore::new();
        record_event(
            &store,
            &LedgerEvent::Rejection {
                txid: "tx-2".to_string(),
                error_msg: "signature check failed".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            store.get(&keys::tx_result("tx-2")).await.unwrap().as_deref(),
            Some("signature check failed")
        );
    }
}
