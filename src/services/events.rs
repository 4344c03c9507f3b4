//! Ledger result handler.
//!
//! For every txid in `events:pending` that has BOTH a commit outcome and
//! a batch payload recorded, dispatch the per-member success/fail
//! partition to the driver that issued the batch, then park the txid in
//! `events:handled`. Txids with only half of the join present stay
//! queued until the missing event arrives.

use std::sync::Arc;

use crate::ledger::{BatchResult, SrcMethod, EVENT_EXCHANGE, EVENT_LOCK, LEDGER_SUCCESS};
use crate::metrics;
use crate::store::{keys, OrderStore, Store};

use super::{CancelDriver, DriverError, ExpiryDriver, LockDriver, SettleDriver};

pub struct EventDriver {
    store: Arc<OrderStore>,
    lock: Arc<LockDriver>,
    settle: Arc<SettleDriver>,
    expiry: Arc<ExpiryDriver>,
    cancel: Arc<CancelDriver>,
    batch: i64,
}

impl EventDriver {
    pub fn new(
        store: Arc<OrderStore>,
        lock: Arc<LockDriver>,
        settle: Arc<SettleDriver>,
        expiry: Arc<ExpiryDriver>,
        cancel: Arc<CancelDriver>,
        batch: i64,
    ) -> Self {
        Self {
            store,
            lock,
            settle,
            expiry,
            cancel,
            batch,
        }
    }

    pub async fn run_once(&self) -> Result<(), DriverError> {
        let raw = self.store.raw();
        let txids = raw.set_sample(keys::EVENTS_PENDING, self.batch).await?;

        for txid in txids {
            if raw.set_contains(keys::EVENTS_HANDLED, &txid).await? {
                raw.set_rem(keys::EVENTS_PENDING, &txid).await?;
                continue;
            }

            // Wait for the commit outcome.
            let Some(outcome) = raw.get(&keys::tx_result(&txid)).await? else {
                continue;
            };

            if outcome != LEDGER_SUCCESS {
                // The whole batch failed on-chain; no per-member
                // handling. The feeder queues still hold the orders, so
                // they are resampled.
                tracing::warn!(%txid, error = %outcome, "ledger rejected batch");
                self.mark_handled(&txid).await?;
                metrics::record_ledger_event();
                continue;
            }

            // Wait for the per-member payload.
            let Some(payload) = raw.get(&keys::tx_batch(&txid)).await? else {
                continue;
            };

            let batch: BatchResult = match serde_json::from_str(&payload) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(%txid, error = %e, "discarding malformed batch payload");
                    self.mark_handled(&txid).await?;
                    continue;
                }
            };

            tracing::debug!(
                %txid,
                event = %batch.event_name,
                method = %batch.src_method,
                ok = batch.success.len(),
                failed = batch.fail.len(),
                "applying ledger result"
            );
            self.dispatch(&batch).await?;
            self.mark_handled(&txid).await?;
            metrics::record_ledger_event();
        }

        Ok(())
    }

    async fn dispatch(&self, batch: &BatchResult) -> Result<(), DriverError> {
        match batch.event_name.as_str() {
            EVENT_LOCK => match batch.src_method.as_str() {
                m if m == SrcMethod::Lock.as_str() => {
                    self.lock.apply_success(&batch.success).await?;
                    self.lock.apply_fail(&batch.fail).await?;
                }
                m if m == SrcMethod::Expire.as_str() => {
                    self.expiry.apply_success(&batch.success).await?;
                    self.expiry.apply_fail(&batch.fail).await?;
                }
                m if m == SrcMethod::Cancel.as_str() => {
                    self.cancel.apply_success(&batch.success).await?;
                    self.cancel.apply_fail(&batch.fail).await?;
                }
                other => {
                    tracing::debug!(method = %other, "unhandled lock result");
                }
            },
            EVENT_EXCHANGE => {
                self.settle.apply_success(&batch.success).await?;
                self.settle.apply_fail(&batch.fail).await?;
            }
            other => {
                tracing::debug!(event = %other, "unhandled ledger event");
            }
        }
        Ok(())
    }

    async fn mark_handled(&self, txid: &str) -> Result<(), DriverError> {
        self.store
            .raw()
            .set_move(keys::EVENTS_PENDING, keys::EVENTS_HANDLED, txid)
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::ScriptedLedger;
    use super::*;
    use crate::ledger::{listener::record_event, FailInfo, LedgerEvent};
    use crate::models::{Order, OrderStatus};
    use crate::services::{ExpiryScanner, MatchDriver};
    use crate::store::{MemoryStore, OrderStore, Store};

    const SCALE: f64 = 1_000_000.0;

    /// The whole worker pipeline over an in-process store and a scripted
    /// ledger.
    struct Pipeline {
        raw: Arc<dyn Store>,
        store: Arc<OrderStore>,
        ledger: Arc<ScriptedLedger>,
        lock: Arc<LockDriver>,
        matcher: MatchDriver,
        settle: Arc<SettleDriver>,
        scanner: ExpiryScanner,
        expiry: Arc<ExpiryDriver>,
        cancel: Arc<CancelDriver>,
        events: EventDriver,
    }

    impl Pipeline {
        fn new() -> Self {
            let raw: Arc<dyn Store> = Arc::new(MemoryStore::new());
            let store = Arc::new(OrderStore::new(raw.clone()));
            let ledger = Arc::new(ScriptedLedger::default());

            let lock = Arc::new(LockDriver::new(store.clone(), ledger.clone(), 16, SCALE));
            let settle = Arc::new(SettleDriver::new(store.clone(), ledger.clone(), 16, SCALE));
            let expiry = Arc::new(ExpiryDriver::new(store.clone(), ledger.clone(), 16, SCALE));
            let cancel = Arc::new(CancelDriver::new(store.clone(), ledger.clone(), 16, SCALE));
            let events = EventDriver::new(
                store.clone(),
                lock.clone(),
                settle.clone(),
                expiry.clone(),
                cancel.clone(),
                32,
            );

            Pipeline {
                matcher: MatchDriver::new(store.clone(), SCALE),
                scanner: ExpiryScanner::new(store.clone()),
                raw,
                store,
                ledger,
                lock,
                settle,
                expiry,
                cancel,
                events,
            }
        }

        async fn submit(
            &self,
            account: &str,
            src: &str,
            src_count: f64,
            des: &str,
            des_count: f64,
            is_buy_all: bool,
            expired_time: i64,
            pending_time: i64,
        ) -> Order {
            let order = Order::new(
                account,
                src,
                src_count,
                des,
                des_count,
                is_buy_all,
                expired_time,
                pending_time,
            );
            self.store.submit(&order).await.unwrap();
            order
        }

        /// Deliver a committed batch result for `txid` and apply it.
        async fn deliver_success(&self, txid: &str, event_name: &str, method: &str,
            success: Vec<String>, fail: Vec<FailInfo>) {
            record_event(
                self.raw.as_ref(),
                &LedgerEvent::Block {
                    txids: vec![txid.to_string()],
                },
            )
            .await
            .unwrap();
            record_event(
                self.raw.as_ref(),
                &LedgerEvent::Chaincode {
                    txid: txid.to_string(),
                    payload: BatchResult {
                        event_name: event_name.to_string(),
                        src_method: method.to_string(),
                        success,
                        fail,
                    },
                },
            )
            .await
            .unwrap();
            self.events.run_once().await.unwrap();
        }

        /// Run the lock driver and acknowledge every order it sent.
        async fn lock_and_ack(&self) {
            self.lock.run_once().await.unwrap();
            let call = self.ledger.lock_calls().pop().expect("a lock batch");
            let uuids = call.infos.iter().map(|i| i.order_id.clone()).collect();
            self.deliver_success(&call.txid, EVENT_LOCK, "lock", uuids, vec![])
                .await;
        }

        /// Run the settlement driver and acknowledge every pair it sent.
        async fn settle_and_ack(&self) {
            self.settle.run_once().await.unwrap();
            let call = self.ledger.exchange_calls().pop().expect("an exchange batch");
            let pairs = call
                .pairs
                .iter()
                .map(|p| format!("{},{}", p.buy_order.uuid, p.sell_order.uuid))
                .collect();
            self.deliver_success(&call.txid, EVENT_EXCHANGE, "exchange", pairs, vec![])
                .await;
        }
    }

    #[tokio::test]
    async fn trivial_cross_settles_both_orders() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;
        let bob = p.submit("bob", "EUR", 90.0, "USD", 100.0, false, 0, 2).await;

        p.lock_and_ack().await;
        p.matcher.run_once().await.unwrap();

        let matched = p.raw.set_members(keys::MATCHED).await.unwrap();
        assert_eq!(matched.len(), 1);

        p.settle_and_ack().await;

        let a = p.store.get_order(&alice.uuid).await.unwrap();
        let b = p.store.get_order(&bob.uuid).await.unwrap();
        assert_eq!(a.status, OrderStatus::Finished);
        assert_eq!(b.status, OrderStatus::Finished);
        assert_eq!(a.matched_uuid, bob.uuid);
        assert_eq!(b.matched_uuid, alice.uuid);
        assert_eq!(a.final_cost, 100.0);
        assert_eq!(b.final_cost, 90.0);

        assert!(p.raw.set_members(keys::MATCHED).await.unwrap().is_empty());
        assert!(p.raw.set_contains(keys::FINISHED, &alice.uuid).await.unwrap());
        assert!(p.raw.set_contains(keys::FINISHED, &bob.uuid).await.unwrap());
    }

    #[tokio::test]
    async fn partial_fill_splits_and_settles_the_child() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;
        let bob = p.submit("bob", "EUR", 45.0, "USD", 50.0, false, 0, 2).await;

        p.lock_and_ack().await;
        p.matcher.run_once().await.unwrap();

        // Bob is fully consumed, Alice shrinks to (50 USD -> 45 EUR) and
        // stays in the book; her filled half settles as a child order.
        let residual = p.store.get_order(&alice.uuid).await.unwrap();
        assert_eq!(residual.src_count, 50.0);
        assert_eq!(residual.des_count, 45.0);
        assert_eq!(residual.status, OrderStatus::Live);
        let book = keys::book("USD", "EUR");
        assert_eq!(
            p.store.top_of_book(&book).await.unwrap().as_deref(),
            Some(alice.uuid.as_str())
        );

        // Book keys are visited in sorted order, so Bob's side
        // (EUR -> USD) is the buy half of the pair.
        let matched = p.raw.set_members(keys::MATCHED).await.unwrap();
        assert_eq!(matched.len(), 1);
        let (buy_uuid, child_uuid) = matched[0].split_once(',').unwrap();
        assert_eq!(buy_uuid, bob.uuid);
        assert_ne!(child_uuid, alice.uuid);

        let child = p.store.get_order(child_uuid).await.unwrap();
        assert_eq!(child.raw_uuid, alice.uuid);
        assert_eq!(child.src_count, 50.0);
        assert_eq!(child.des_count, 45.0);
        assert_eq!(child.raw_src_count, 100.0);
        assert_eq!(child.raw_des_count, 90.0);

        p.settle_and_ack().await;

        let child = p.store.get_order(child_uuid).await.unwrap();
        let b = p.store.get_order(&bob.uuid).await.unwrap();
        assert_eq!(child.status, OrderStatus::Finished);
        assert_eq!(b.status, OrderStatus::Finished);
        assert_eq!(b.final_cost, 45.0);
        assert_eq!(child.matched_uuid, bob.uuid);

        // The residual parent is still live and matchable.
        assert_eq!(
            p.store.get_order(&alice.uuid).await.unwrap().status,
            OrderStatus::Live
        );
    }

    #[tokio::test]
    async fn no_cross_leaves_both_books_untouched() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 100.0, false, 0, 1).await;
        let bob = p.submit("bob", "EUR", 50.0, "USD", 100.0, false, 0, 2).await;

        p.lock_and_ack().await;
        p.matcher.run_once().await.unwrap();

        assert!(p.raw.set_members(keys::MATCHED).await.unwrap().is_empty());
        assert_eq!(
            p.store
                .top_of_book(&keys::book("USD", "EUR"))
                .await
                .unwrap()
                .as_deref(),
            Some(alice.uuid.as_str())
        );
        assert_eq!(
            p.store
                .top_of_book(&keys::book("EUR", "USD"))
                .await
                .unwrap()
                .as_deref(),
            Some(bob.uuid.as_str())
        );
    }

    #[tokio::test]
    async fn expired_order_is_released_on_chain() {
        let p = Pipeline::new();
        // expired_time = 1: long past by wall-clock now.
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 1, 1).await;

        p.lock_and_ack().await;
        p.scanner.run_once().await.unwrap();

        assert!(p.raw.set_contains(keys::EXPIRED, &alice.uuid).await.unwrap());
        assert_eq!(
            p.store.get_order(&alice.uuid).await.unwrap().status,
            OrderStatus::Expired
        );

        p.expiry.run_once().await.unwrap();
        let call = p.ledger.lock_calls().pop().unwrap();
        assert!(!call.is_lock);
        assert_eq!(call.method, SrcMethod::Expire);

        p.deliver_success(
            &call.txid,
            EVENT_LOCK,
            "expire",
            vec![alice.uuid.clone()],
            vec![],
        )
        .await;

        assert!(p
            .raw
            .set_contains(keys::EXPIRED_SUCCESS, &alice.uuid)
            .await
            .unwrap());
        assert!(!p.raw.set_contains(keys::EXPIRED, &alice.uuid).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_request_races_cleanly_with_the_matcher() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;
        let bob = p.submit("bob", "EUR", 90.0, "USD", 100.0, false, 0, 2).await;

        p.lock_and_ack().await;

        // The cancel pipeline commits first: the matcher must not see
        // Alice.
        assert!(p.store.request_cancel(&alice.uuid).await.unwrap());
        p.matcher.run_once().await.unwrap();
        assert!(p.raw.set_members(keys::MATCHED).await.unwrap().is_empty());

        p.cancel.run_once().await.unwrap();
        let call = p.ledger.lock_calls().pop().unwrap();
        assert_eq!(call.method, SrcMethod::Cancel);
        p.deliver_success(
            &call.txid,
            EVENT_LOCK,
            "cancel",
            vec![alice.uuid.clone()],
            vec![],
        )
        .await;

        assert_eq!(
            p.store.get_order(&alice.uuid).await.unwrap().status,
            OrderStatus::Cancelled
        );
        // Bob is still waiting in his book.
        assert_eq!(
            p.store
                .top_of_book(&keys::book("EUR", "USD"))
                .await
                .unwrap()
                .as_deref(),
            Some(bob.uuid.as_str())
        );
    }

    #[tokio::test]
    async fn cancel_after_match_is_rejected() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;
        p.submit("bob", "EUR", 90.0, "USD", 100.0, false, 0, 2).await;

        p.lock_and_ack().await;

        // The matcher wins the race: Alice leaves her book.
        p.matcher.run_once().await.unwrap();
        assert!(!p.store.request_cancel(&alice.uuid).await.unwrap());
    }

    #[tokio::test]
    async fn lock_refusal_parks_the_order_with_the_reason() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;

        p.lock.run_once().await.unwrap();
        let call = p.ledger.lock_calls().pop().unwrap();
        p.deliver_success(
            &call.txid,
            EVENT_LOCK,
            "lock",
            vec![],
            vec![FailInfo {
                id: alice.uuid.clone(),
                info: "insufficient".to_string(),
            }],
        )
        .await;

        assert!(p.raw.set_contains(keys::PEND_FAIL, &alice.uuid).await.unwrap());
        let order = p.store.get_order(&alice.uuid).await.unwrap();
        assert_eq!(order.metadata, "insufficient");
        // Never entered a book.
        assert!(p.store.book_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaying_a_handled_result_is_a_no_op() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;
        let bob = p.submit("bob", "EUR", 90.0, "USD", 100.0, false, 0, 2).await;

        p.lock_and_ack().await;
        p.matcher.run_once().await.unwrap();
        p.settle_and_ack().await;

        let finished_at = p.store.get_order(&alice.uuid).await.unwrap().finished_time;
        let exchange = p.ledger.exchange_calls().pop().unwrap();

        // Re-deliver the exchange result: the listener refuses to
        // requeue a handled txid.
        record_event(
            p.raw.as_ref(),
            &LedgerEvent::Block {
                txids: vec![exchange.txid.clone()],
            },
        )
        .await
        .unwrap();
        assert!(!p
            .raw
            .set_contains(keys::EVENTS_PENDING, &exchange.txid)
            .await
            .unwrap());

        // Even a forced requeue falls through the handled guard.
        p.raw
            .set_add(keys::EVENTS_PENDING, &exchange.txid)
            .await
            .unwrap();
        p.events.run_once().await.unwrap();
        assert!(!p
            .raw
            .set_contains(keys::EVENTS_PENDING, &exchange.txid)
            .await
            .unwrap());

        assert_eq!(
            p.store.get_order(&alice.uuid).await.unwrap().finished_time,
            finished_at
        );
        assert_eq!(
            p.store.get_order(&bob.uuid).await.unwrap().matched_uuid,
            alice.uuid
        );
    }

    #[tokio::test]
    async fn rejected_batch_leaves_orders_for_resampling() {
        let p = Pipeline::new();
        let alice = p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;

        p.lock.run_once().await.unwrap();
        let call = p.ledger.lock_calls().pop().unwrap();

        record_event(
            p.raw.as_ref(),
            &LedgerEvent::Rejection {
                txid: call.txid.clone(),
                error_msg: "endorsement failed".to_string(),
            },
        )
        .await
        .unwrap();
        p.events.run_once().await.unwrap();

        // Still pending: the next lock tick resamples her.
        assert!(p.raw.set_contains(keys::PENDING, &alice.uuid).await.unwrap());
        assert!(p
            .raw
            .set_contains(keys::EVENTS_HANDLED, &call.txid)
            .await
            .unwrap());

        p.lock.run_once().await.unwrap();
        assert_eq!(p.ledger.lock_calls().len(), 2);
    }

    #[tokio::test]
    async fn matcher_records_last_price() {
        let p = Pipeline::new();
        p.submit("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1).await;
        p.submit("bob", "EUR", 90.0, "USD", 100.0, false, 0, 2).await;

        p.lock_and_ack().await;
        p.matcher.run_once().await.unwrap();

        // Both quote the same price; executed at 100/90 destination per
        // source of the earlier (buy-side) book that was crossed.
        let last = p.store.last_price().await.unwrap().unwrap();
        assert!(last > 0);
    }
}
