//! Settlement driver.
//!
//! Samples matched pairs, ships them to the ledger as one exchange
//! invocation in scaled-integer form, and finalizes each pair the
//! reconciler reports as settled. A pair whose result never arrives (or
//! whose batch fails wholesale) simply stays in `matched` and is
//! resubmitted on a later tick.

use std::sync::Arc;

use crate::ledger::{ExchangePair, FailInfo, LedgerClient};
use crate::metrics;
use crate::models::OrderInt;
use crate::store::{keys, OrderStore, Store};

use super::{now_unix, DriverError};

pub struct SettleDriver {
    store: Arc<OrderStore>,
    ledger: Arc<dyn LedgerClient>,
    batch: i64,
    scale: f64,
}

impl SettleDriver {
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
        let pairs = self.store.raw().set_sample(keys::MATCHED, self.batch).await?;
        if pairs.is_empty() {
            return Ok(());
        }

        let mut exchanges = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            let Some((buy_uuid, sell_uuid)) = pair.split_once(',') else {
                tracing::warn!(%pair, "skipping malformed matched pair");
                continue;
            };
            let Some(buy) = self.store.try_get_order(buy_uuid).await? else {
                continue;
            };
            let Some(sell) = self.store.try_get_order(sell_uuid).await? else {
                continue;
            };

            exchanges.push(ExchangePair {
                buy_order: OrderInt::from_order(&buy, self.scale),
                sell_order: OrderInt::from_order(&sell, self.scale),
            });
        }

        if exchanges.is_empty() {
            return Ok(());
        }

        let txid = self.ledger.exchange(&exchanges).await?;
        metrics::record_ledger_batch("exchange");
        tracing::debug!(%txid, count = exchanges.len(), "exchange batch submitted");
        Ok(())
    }

    /// Success members are the `"buy,sell"` pair strings.
    pub async fn apply_success(&self, pairs: &[String]) -> Result<(), DriverError> {
        let now = now_unix();
        for pair in pairs {
            self.store.finish_pair(pair, now).await?;
            metrics::record_settlement();
            tracing::info!(%pair, "pair settled");
        }
        Ok(())
    }

    /// Per-pair settlement failure carries no compensating transition:
    /// the pair stays in `matched` and the next tick resubmits it.
    pub async fn apply_fail(&self, fails: &[FailInfo]) -> Result<(), DriverError> {
        for fail in fails {
            tracing::warn!(pair = %fail.id, reason = %fail.info, "pair settlement failed");
        }
        Ok(())
    }
}
