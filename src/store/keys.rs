//! Key layout of the coordination store.
//!
//! Queue keys are fixed strings; books, user histories and transaction
//! results are built from their identifying parts. Book keys follow
//! `book:{src}:{des}`, so currency codes must not contain `:` (enforced
//! at the REST boundary).

/// Orders accepted by REST, waiting for a balance lock.
pub const PENDING: &str = "orders:pending";
/// Lock step terminal sets.
pub const PEND_SUCCESS: &str = "orders:pend-success";
pub const PEND_FAIL: &str = "orders:pend-fail";
/// Matched pairs (`"buyUuid,sellUuid"`) awaiting settlement.
pub const MATCHED: &str = "orders:matched";
/// Successfully settled orders.
pub const FINISHED: &str = "orders:finished";
/// Expiry pre/post ledger-unlock sets.
pub const EXPIRED: &str = "orders:expired";
pub const EXPIRED_SUCCESS: &str = "orders:expired-success";
/// Cancellation triplet.
pub const CANCELING: &str = "orders:canceling";
pub const CANCEL_SUCCESS: &str = "orders:cancel-success";
pub const CANCEL_FAIL: &str = "orders:cancel-fail";
/// Last executed price, scaled to integer ledger units.
pub const LAST_PRICE: &str = "stats:last-price";
/// Ledger transactions with results not yet applied / already applied.
pub const EVENTS_PENDING: &str = "events:pending";
pub const EVENTS_HANDLED: &str = "events:handled";

const BOOK_PREFIX: &str = "book:";

/// Pattern matching every book key.
pub const BOOK_PATTERN: &str = "book:*";

/// Record of a single order.
pub fn order(uuid: &str) -> String {
    format!("order:{}", uuid)
}

/// Book of orders offering `src` for `des`.
pub fn book(src_currency: &str, des_currency: &str) -> String {
    format!("{}{}:{}", BOOK_PREFIX, src_currency, des_currency)
}

/// The opposite side of a book key: `book:A:B` -> `book:B:A`.
pub fn book_reverse(key: &str) -> Option<String> {
    let rest = key.strip_prefix(BOOK_PREFIX)?;
    let (src, des) = rest.split_once(':')?;
    Some(book(des, src))
}

/// Every uuid an account has touched.
pub fn user(account: &str) -> String {
    format!("user:{}", account)
}

/// Commit outcome of a ledger transaction (`"SUCCESS"` or an error).
pub fn tx_result(txid: &str) -> String {
    format!("tx:result:{}", txid)
}

/// Per-member batch payload of a ledger transaction.
pub fn tx_batch(txid: &str) -> String {
    format!("tx:batch:{}", txid)
}
