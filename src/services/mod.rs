//! Background worker pipeline.
//!
//! One periodic driver per lifecycle step: lock, match, settle, expiry
//! scan, expiry unlock, cancel, event application. Drivers coordinate
//! only through the store; each pass is idempotent, so a batch whose
//! ledger result never arrives is simply resampled on a later tick.

use std::sync::Arc;

use crate::ledger::{LedgerError, LockInfo};
use crate::models::scale_amount;
use crate::store::{OrderStore, StoreError};

pub mod cancel;
pub mod events;
pub mod expiry;
pub mod lock;
pub mod matching;
pub mod settlement;
pub mod worker;

pub use cancel::CancelDriver;
pub use events::EventDriver;
pub use expiry::{ExpiryDriver, ExpiryScanner};
pub use lock::LockDriver;
pub use matching::MatchDriver;
pub use settlement::SettleDriver;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DriverError {
    /// Invariant violations stop the worker; everything else is
    /// transient and retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Store(StoreError::Invariant(_)))
    }
}

/// Build the lock payload for a batch of order ids. Orders whose record
/// has vanished are skipped, the way a resampled batch expects.
pub(crate) async fn lock_infos(
    store: &Arc<OrderStore>,
    uuids: &[String],
    scale: f64,
) -> Result<Vec<LockInfo>, StoreError> {
    let mut infos = Vec::with_capacity(uuids.len());
    for uuid in uuids {
        let Some(order) = store.try_get_order(uuid).await? else {
            continue;
        };
        infos.push(LockInfo {
            owner: order.account.clone(),
            currency: order.src_currency.clone(),
            order_id: order.uuid.clone(),
            count: scale_amount(order.src_count, scale),
        });
    }
    Ok(infos)
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
