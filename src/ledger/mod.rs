//! Ledger boundary.
//!
//! The smart-contract ledger is reached through its HTTP adaptor for
//! invocations ([`LedgerClient`]) and observed through a WebSocket event
//! feed ([`listener`]). Invocations are fire-and-forget: the txid comes
//! back immediately, the outcome arrives later as events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::OrderInt;

pub mod http;
pub mod listener;

pub use http::HttpLedgerClient;

/// Commit outcome value recorded for a successful transaction.
pub const LEDGER_SUCCESS: &str = "SUCCESS";

/// Contract event emitted for batched lock/unlock invocations.
pub const EVENT_LOCK: &str = "chaincode_lock";
/// Contract event emitted for exchange invocations.
pub const EVENT_EXCHANGE: &str = "chaincode_exchange";

/// Which driver originated a lock-family invocation; echoed back in the
/// batch result so the reconciler can route it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcMethod {
    Lock,
    Expire,
    Cancel,
}

impl SrcMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SrcMethod::Lock => "lock",
            SrcMethod::Expire => "expire",
            SrcMethod::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for SrcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One balance reservation (or release) shipped to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub owner: String,
    pub currency: String,
    pub order_id: String,
    /// Scaled integer amount.
    pub count: i64,
}

/// A matched pair submitted for atomic settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePair {
    pub buy_order: OrderInt,
    pub sell_order: OrderInt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailInfo {
    pub id: String,
    pub info: String,
}

/// Per-member outcome of a batched invocation, delivered as a contract
/// event. `success` members for lock batches are order ids; for exchange
/// batches they are `"buy,sell"` pair strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchResult {
    pub event_name: String,
    pub src_method: String,
    pub success: Vec<String>,
    pub fail: Vec<FailInfo>,
}

/// Events from the ledger feed, keyed by transaction id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LedgerEvent {
    /// Transactions committed in a block.
    Block { txids: Vec<String> },
    /// Transaction rejected before commit.
    #[serde(rename_all = "camelCase")]
    Rejection { txid: String, error_msg: String },
    /// Contract event carrying the per-member batch outcome.
    Chaincode { txid: String, payload: BatchResult },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger deadline exceeded")]
    Timeout,

    #[error("ledger rpc failed: {0}")]
    Rpc(reqwest::Error),

    #[error("malformed ledger response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else {
            LedgerError::Rpc(err)
        }
    }
}

/// Invocation surface of the ledger adaptor. Both calls return the
/// transaction id; results arrive via the event feed.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Reserve (`is_lock`) or release source balances for a batch of
    /// orders. `src_method` tags the batch so its result routes back to
    /// the originating driver.
    async fn lock(
        &self,
        infos: &[LockInfo],
        is_lock: bool,
        src_method: SrcMethod,
    ) -> Result<String, LedgerError>;

    /// Atomically swap the locked balances of matched pairs.
    async fn exchange(&self, pairs: &[ExchangePair]) -> Result<String, LedgerError>;
}
