//! Balance-lock driver.
//!
//! Samples pending orders, asks the ledger to reserve each seller's
//! source balance, and applies the demultiplexed result when the event
//! reconciler delivers it: locked orders enter their book, refused
//! orders are parked in the pend-fail set with the refusal reason.

use std::sync::Arc;

use crate::ledger::{FailInfo, LedgerClient, SrcMethod};
use crate::metrics;
use crate::store::{keys, OrderStore, Store};

use super::{lock_infos, now_unix, DriverError};

pub struct LockDriver {
    store: Arc<OrderStore>,
    ledger: Arc<dyn LedgerClient>,
    batch: i64,
    scale: f64,
}

impl LockDriver {
    pub fn new(
        store: Arc<OrderStore>,
        ledger: Arc<dyn LedgerClient>,
        batch: i64,
        scale: f64,
    ) -> Self {
        Self {
            store,
            ledger,
            batch,
            scale,
        }
    }

    /// One tick: submit a lock batch for up to `batch` pending orders.
    /// The orders stay in `pending` until their result arrives, so a
    /// lost batch is resampled on a later tick.
    pub async fn run_once(&self) -> Result<(), DriverError> {
        let uuids = self.store.raw().set_sample(keys::PENDING, self.batch).await?;
        if uuids.is_empty() {
            return Ok(());
        }

        let infos = lock_infos(&self.store, &uuids, self.scale).await?;
        if infos.is_empty() {
            return Ok(());
        }

        let txid = self.ledger.lock(&infos, true, SrcMethod::Lock).await?;
        metrics::record_ledger_batch(SrcMethod::Lock.as_str());
        tracing::debug!(%txid, count = infos.len(), "lock batch submitted");
        Ok(())
    }

    pub async fn apply_success(&self, uuids: &[String]) -> Result<(), DriverError> {
        let now = now_unix();
        for uuid in uuids {
            self.store.book_order(uuid, now).await?;
            metrics::record_order_booked();
            tracing::debug!(%uuid, "order booked after lock");
        }
        Ok(())
    }

    pub async fn apply_fail(&self, fails: &[FailInfo]) -> Result<(), DriverError> {
        for fail in fails {
            self.store.fail_pending(&fail.id, &fail.info).await?;
            metrics::record_lock_failed();
            tracing::debug!(uuid = %fail.id, reason = %fail.info, "lock refused");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Order;
    use crate::services::events::tests_support::ScriptedLedger;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn lock_batch_carries_scaled_source_amounts() {
        let store = Arc::new(OrderStore::new(Arc::new(MemoryStore::new())));
        let ledger = Arc::new(ScriptedLedger::default());
        let driver = LockDriver::new(store.clone(), ledger.clone(), 16, 1e6);

        let order = Order::new("alice", "USD", 100.5, "EUR", 90.0, false, 0, 1_700_000_000);
        store.submit(&order).await.unwrap();

        driver.run_once().await.unwrap();

        let locks = ledger.lock_calls();
        assert_eq!(locks.len(), 1);
        assert!(locks[0].is_lock);
        assert_eq!(locks[0].method, SrcMethod::Lock);
        assert_eq!(locks[0].infos.len(), 1);
        assert_eq!(locks[0].infos[0].owner, "alice");
        assert_eq!(locks[0].infos[0].currency, "USD");
        assert_eq!(locks[0].infos[0].count, 100_500_000);
    }

    #[tokio::test]
    async fn empty_pending_set_skips_the_ledger() {
        let store = Arc::new(OrderStore::new(Arc::new(MemoryStore::new())));
        let ledger = Arc::new(ScriptedLedger::default());
        let driver = LockDriver::new(store, ledger.clone(), 16, 1e6);

        driver.run_once().await.unwrap();
        assert!(ledger.lock_calls().is_empty());
    }
}
