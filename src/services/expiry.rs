//! Expiration scanner and expiry driver.
//!
//! The scanner walks every live book and routes orders whose deadline
//! has passed into the expired set. The driver releases their reserved
//! balances through the ledger's unlock path and finalizes them on
//! acknowledgment.

use std::sync::Arc;

use crate::ledger::{FailInfo, LedgerClient, SrcMethod};
use crate::metrics;
use crate::store::{keys, OrderStore, Store};

use super::{lock_infos, now_unix, DriverError};

pub struct ExpiryScanner {
    store: Arc<OrderStore>,
}

impl ExpiryScanner {
    pub fn new(store: Arc<OrderStore>) -> Self {
        Self { store }
    }

    /// One bounded pass over all books.
    pub async fn run_once(&self) -> Result<(), DriverError> {
        let now = now_unix();
        for book_key in self.store.book_keys().await? {
            let uuids = self.store.raw().zset_range(&book_key, 0, -1).await?;
            for uuid in uuids {
                let Some(order) = self.store.try_get_order(&uuid).await? else {
                    continue;
                };
                if order.is_expired(now) {
                    tracing::debug!(%uuid, expired_time = order.expired_time, "order expired");
                    self.store.expire_order(&uuid).await?;
                    metrics::record_expiration();
                }
            }
        }
        Ok(())
    }
}

pub struct ExpiryDriver {
    store: Arc<OrderStore>,
    ledger: Arc<dyn LedgerClient>,
    batch: i64,
    scale: f64,
}

impl ExpiryDriver {
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

    /// Release the reserved balance of a batch of expired orders.
    pub async fn run_once(&self) -> Result<(), DriverError> {
        let uuids = self.store.raw().set_sample(keys::EXPIRED, self.batch).await?;
        if uuids.is_empty() {
            return Ok(());
        }

        let infos = lock_infos(&self.store, &uuids, self.scale).await?;
        if infos.is_empty() {
            return Ok(());
        }

        let txid = self.ledger.lock(&infos, false, SrcMethod::Expire).await?;
        metrics::record_ledger_batch(SrcMethod::Expire.as_str());
        tracing::debug!(%txid, count = infos.len(), "expire batch submitted");
        Ok(())
    }

    pub async fn apply_success(&self, uuids: &[String]) -> Result<(), DriverError> {
        for uuid in uuids {
            self.store.expire_done(uuid).await?;
            tracing::debug!(%uuid, "expired order released");
        }
        Ok(())
    }

    /// Unlock refusal leaves the order in `expired`; the next tick tries
    /// again.
    pub async fn apply_fail(&self, fails: &[FailInfo]) -> Result<(), DriverError> {
        for fail in fails {
            tracing::warn!(uuid = %fail.id, reason = %fail.info, "expire unlock failed");
        }
        Ok(())
    }
}
