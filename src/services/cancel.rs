//! Cancellation driver.
//!
//! REST moves a cancellable order from its book into `canceling` (see
//! `OrderStore::request_cancel`); this driver drains that set through
//! the ledger's unlock path. Refused cancellations are restored into the
//! book at their original score.

use std::sync::Arc;

use crate::ledger::{FailInfo, LedgerClient, SrcMethod};
use crate::metrics;
use crate::store::{keys, OrderStore, Store};

use super::{lock_infos, DriverError};

pub struct CancelDriver {
    store: Arc<OrderStore>,
    ledger: Arc<dyn LedgerClient>,
    batch: i64,
    scale: f64,
}

impl CancelDriver {
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

    pub async fn run_once(&self) -> Result<(), DriverError> {
        let uuids = self
            .store
            .raw()
            .set_sample(keys::CANCELING, self.batch)
            .await?;
        if uuids.is_empty() {
            return Ok(());
        }

        let infos = lock_infos(&self.store, &uuids, self.scale).await?;
        if infos.is_empty() {
            return Ok(());
        }

        let txid = self.ledger.lock(&infos, false, SrcMethod::Cancel).await?;
        metrics::record_ledger_batch(SrcMethod::Cancel.as_str());
        tracing::debug!(%txid, count = infos.len(), "cancel batch submitted");
        Ok(())
    }

    pub async fn apply_success(&self, uuids: &[String]) -> Result<(), DriverError> {
        for uuid in uuids {
            self.store.cancel_done(uuid).await?;
            metrics::record_cancellation();
            tracing::info!(%uuid, "order cancelled");
        }
        Ok(())
    }

    pub async fn apply_fail(&self, fails: &[FailInfo]) -> Result<(), DriverError> {
        for fail in fails {
            self.store.restore_cancel_failed(&fail.id, &fail.info).await?;
            metrics::record_cancel_failure();
            tracing::warn!(uuid = %fail.id, reason = %fail.info, "cancel refused, order restored");
        }
        Ok(())
    }
}
