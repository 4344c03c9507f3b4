//! Order model and book scoring.
//!
//! An [`Order`] is a standing offer to exchange `src_count` units of
//! `src_currency` for `des_count` units of `des_currency`. Matching
//! arithmetic runs on `f64` rounded to six decimals; everything crossing
//! the ledger boundary is scaled to integer units via [`OrderInt`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Default amount scale toward the ledger: 10^6 integer units per 1.0.
pub const DEFAULT_AMOUNT_SCALE: f64 = 1_000_000.0;

/// Residuals below one scaled unit are treated as fully consumed.
pub const AMOUNT_EPSILON: f64 = 1e-6;

/// Terminal indicator of an order. Transitions are monotonic: `Live` may
/// move to any terminal state, terminal states never change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    Live,
    Finished,
    Expired,
    Cancelled,
}

impl OrderStatus {
    pub fn code(self) -> u8 {
        match self {
            OrderStatus::Live => 0,
            OrderStatus::Finished => 1,
            OrderStatus::Expired => 2,
            OrderStatus::Cancelled => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OrderStatus::Live),
            1 => Some(OrderStatus::Finished),
            2 => Some(OrderStatus::Expired),
            3 => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Live)
    }

    /// Whether moving from `self` to `next` is legal. Re-applying the
    /// current status is allowed so result replays stay no-ops.
    pub fn may_transition(self, next: OrderStatus) -> bool {
        self == OrderStatus::Live || self == next
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        OrderStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown order status {}", code)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    pub uuid: String,
    /// Parent order if this order was spawned by a partial fill,
    /// otherwise equal to `uuid`.
    pub raw_uuid: String,
    pub account: String,
    pub src_currency: String,
    /// Residual source amount currently offered.
    pub src_count: f64,
    pub des_currency: String,
    /// Residual destination amount currently requested.
    pub des_count: f64,
    /// Amounts at original submission; preserved across splits.
    pub raw_src_count: f64,
    pub raw_des_count: f64,
    /// true: fill until the destination amount is acquired;
    /// false: fill until the source amount is consumed.
    pub is_buy_all: bool,
    /// Unix seconds; 0 means no expiry.
    pub expired_time: i64,
    pub pending_time: i64,
    pub pended_time: i64,
    pub matched_time: i64,
    pub finished_time: i64,
    /// Counterparty uuid, set on successful settlement.
    pub matched_uuid: String,
    /// Source actually consumed by settlement. Under `is_buy_all` the
    /// last fill may consume less than `src_count`.
    pub final_cost: f64,
    pub status: OrderStatus,
    /// Last failure reason, if any.
    pub metadata: String,
}

impl Order {
    /// A fresh order as accepted from the REST surface. Residual and raw
    /// amounts start equal; the uuid doubles as `raw_uuid` until a split.
    pub fn new(
        account: &str,
        src_currency: &str,
        src_count: f64,
        des_currency: &str,
        des_count: f64,
        is_buy_all: bool,
        expired_time: i64,
        pending_time: i64,
    ) -> Self {
        let uuid = Uuid::new_v4().to_string();
        Order {
            raw_uuid: uuid.clone(),
            uuid,
            account: account.to_string(),
            src_currency: src_currency.to_string(),
            src_count,
            des_currency: des_currency.to_string(),
            des_count,
            raw_src_count: src_count,
            raw_des_count: des_count,
            is_buy_all,
            expired_time,
            pending_time,
            ..Order::default()
        }
    }

    /// Price seen from the buying perspective: destination per source unit.
    pub fn buy_price(&self) -> f64 {
        self.des_count / self.src_count
    }

    /// Price seen from the selling perspective: source per destination unit.
    pub fn sell_price(&self) -> f64 {
        self.src_count / self.des_count
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expired_time > 0 && self.expired_time <= now
    }

    /// Sort key inside a book sorted set; see [`score`].
    pub fn score(&self) -> f64 {
        score(self.src_count, self.des_count, self.pending_time)
    }
}

/// Integer form of an order as shipped to the ledger: all amounts scaled
/// by the system amount scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInt {
    pub uuid: String,
    pub account: String,
    pub src_currency: String,
    pub src_count: i64,
    pub des_currency: String,
    pub des_count: i64,
    pub is_buy_all: bool,
    pub expired_time: i64,
    pub pending_time: i64,
    pub pended_time: i64,
    pub matched_time: i64,
    pub finished_time: i64,
    pub raw_uuid: String,
    pub metadata: String,
    pub final_cost: i64,
    pub status: u8,
}

impl OrderInt {
    pub fn from_order(order: &Order, scale: f64) -> Self {
        OrderInt {
            uuid: order.uuid.clone(),
            account: order.account.clone(),
            src_currency: order.src_currency.clone(),
            src_count: scale_amount(order.src_count, scale),
            des_currency: order.des_currency.clone(),
            des_count: scale_amount(order.des_count, scale),
            is_buy_all: order.is_buy_all,
            expired_time: order.expired_time,
            pending_time: order.pending_time,
            pended_time: order.pended_time,
            matched_time: order.matched_time,
            finished_time: order.finished_time,
            raw_uuid: order.raw_uuid.clone(),
            metadata: order.metadata.clone(),
            final_cost: scale_amount(order.final_cost, scale),
            status: order.status.code(),
        }
    }
}

/// Scale a float amount to integer ledger units. Rounded, not truncated:
/// values exact after [`round6`] must survive the trip.
pub fn scale_amount(value: f64, scale: f64) -> i64 {
    (value * scale).round() as i64
}

/// Round half away from zero at six decimal places.
pub fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Book sort key: the integral part encodes the price at six-decimal
/// precision, the fractional part breaks ties by submission time.
/// Ranges are read low-to-high, so earlier orders at the same price rank
/// first, and by the symmetric construction of the two book sides a low
/// score is the best offer on both.
pub fn score(src_count: f64, des_count: f64, pending_time: i64) -> f64 {
    round6(des_count / src_count) * 1e6 + time_fraction(pending_time)
}

/// Map unix seconds into (0, 1). A fixed divisor keeps the mapping
/// monotone across epochs of different digit counts.
fn time_fraction(time: i64) -> f64 {
    time as f64 / 1e11
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        let mut order = Order::new("alice", "USD", 100.0, "EUR", 90.0, false, 0, 1_700_000_000);
        order.pended_time = 1_700_000_005;
        order.metadata = "note".to_string();
        order
    }

    #[test]
    fn order_round_trips_through_json() {
        let order = sample_order();
        let js = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&js).unwrap();
        assert_eq!(order, back);
    }

    #[test]
    fn status_serializes_as_code() {
        let mut order = sample_order();
        order.status = OrderStatus::Expired;
        let js = serde_json::to_string(&order).unwrap();
        assert!(js.contains("\"status\":2"), "{}", js);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(OrderStatus::Live.may_transition(OrderStatus::Finished));
        assert!(OrderStatus::Live.may_transition(OrderStatus::Cancelled));
        assert!(OrderStatus::Finished.may_transition(OrderStatus::Finished));
        assert!(!OrderStatus::Finished.may_transition(OrderStatus::Live));
        assert!(!OrderStatus::Expired.may_transition(OrderStatus::Cancelled));
    }

    #[test]
    fn score_orders_by_price_then_time() {
        let cheap = score(100.0, 90.0, 1_700_000_000);
        let dear = score(100.0, 95.0, 1_700_000_000);
        assert!(cheap < dear);

        let earlier = score(100.0, 90.0, 1_700_000_000);
        let later = score(100.0, 90.0, 1_700_000_001);
        assert!(earlier < later);

        // Same price level: the time fraction never reaches the next
        // price step.
        assert_eq!(earlier.trunc(), later.trunc());
    }

    #[test]
    fn score_time_fraction_is_monotone_across_digit_boundary() {
        // 9_999_999_999 has ten digits, 10_000_000_000 has eleven; the
        // fixed divisor keeps ordering intact.
        let before = score(1.0, 1.0, 9_999_999_999);
        let after = score(1.0, 1.0, 10_000_000_000);
        assert!(before < after);
    }

    #[test]
    fn scaling_rounds_to_ledger_units() {
        assert_eq!(scale_amount(0.1, DEFAULT_AMOUNT_SCALE), 100_000);
        assert_eq!(scale_amount(45.0, DEFAULT_AMOUNT_SCALE), 45_000_000);
        assert_eq!(scale_amount(round6(1.0 / 3.0), DEFAULT_AMOUNT_SCALE), 333_333);
    }

    #[test]
    fn order_int_carries_scaled_amounts() {
        let mut order = sample_order();
        order.final_cost = 12.5;
        let wire = OrderInt::from_order(&order, DEFAULT_AMOUNT_SCALE);
        assert_eq!(wire.src_count, 100_000_000);
        assert_eq!(wire.des_count, 90_000_000);
        assert_eq!(wire.final_cost, 12_500_000);
        assert_eq!(wire.status, 0);
        assert_eq!(wire.raw_uuid, order.uuid);
    }

    #[test]
    fn round6_rounds_at_six_decimals() {
        assert_eq!(round6(0.123456789), 0.123457);
        assert_eq!(round6(-0.123456789), -0.123457);
        assert_eq!(round6(0.1234561), 0.123456);
        assert_eq!(round6(2.0), 2.0);
    }
}
