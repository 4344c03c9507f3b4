//! Matching driver.
//!
//! One pass walks every book pair once, peeks top-of-book on both sides
//! and crosses them when the buyer's price covers the seller's ask. The
//! crossing itself is pure ([`cross`]); the resulting [`MatchPlan`] is
//! applied to the store as a single pipelined transaction.

use std::collections::HashSet;
use std::sync::Arc;

use crate::metrics;
use crate::models::{round6, scale_amount, Order, AMOUNT_EPSILON};
use crate::store::orders::set_order_op;
use crate::store::{keys, OrderStore, Store, StoreError, StoreOp};

use super::{now_unix, DriverError};

/// What happens to one side of a crossing.
#[derive(Debug, Clone)]
pub enum SideOutcome {
    /// The order is filled completely: it leaves its book.
    Consumed { order: Order },
    /// Partial fill: the filled portion becomes a child order headed for
    /// settlement while the shrunken parent stays in the book at its
    /// original score.
    Split { parent: Order, child: Order },
}

impl SideOutcome {
    /// The order that actually settles.
    pub fn matched(&self) -> &Order {
        match self {
            SideOutcome::Consumed { order } => order,
            SideOutcome::Split { child, .. } => child,
        }
    }
}

/// The full effect of one crossing, ready to be pipelined.
#[derive(Debug, Clone)]
pub struct MatchPlan {
    /// Executed price in destination-per-source units of the buy side.
    pub price: f64,
    /// Executed quantity, denominated in the buy side's destination.
    pub quantity: f64,
    pub buy: SideOutcome,
    pub sell: SideOutcome,
    /// `"buyUuid,sellUuid"` member for the matched set.
    pub pair: String,
}

impl MatchPlan {
    /// Every mutation of this crossing as one transaction: order
    /// rewrites, book removals, child registrations, the matched-pair
    /// record and the last executed price.
    pub fn to_ops(&self, scale: f64) -> Result<Vec<StoreOp>, StoreError> {
        let mut ops = Vec::new();
        for side in [&self.buy, &self.sell] {
            match side {
                SideOutcome::Consumed { order } => {
                    ops.push(StoreOp::ZRem {
                        key: keys::book(&order.src_currency, &order.des_currency),
                        member: order.uuid.clone(),
                    });
                    ops.push(set_order_op(order)?);
                }
                SideOutcome::Split { parent, child } => {
                    ops.push(set_order_op(parent)?);
                    ops.push(set_order_op(child)?);
                    ops.push(StoreOp::SetAdd {
                        key: keys::user(&child.account),
                        member: child.uuid.clone(),
                    });
                }
            }
        }
        ops.push(StoreOp::SetAdd {
            key: keys::MATCHED.to_string(),
            member: self.pair.clone(),
        });
        ops.push(StoreOp::Set {
            key: keys::LAST_PRICE.to_string(),
            value: scale_amount(round6(self.price), scale).to_string(),
        });
        Ok(ops)
    }
}

/// Attempt to cross two top-of-book orders from opposite books.
///
/// `buy` offers A for B, `sell` offers B for A. No cross exists when the
/// buyer demands more B per A than the seller will accept. On a cross
/// the executed price is the price of the order that entered earlier,
/// and the executed quantity (in B) depends on which sides fill to
/// source and which to destination.
pub fn cross(buy: &Order, sell: &Order, now: i64) -> Result<Option<MatchPlan>, StoreError> {
    if buy.src_currency != sell.des_currency || buy.des_currency != sell.src_currency {
        return Err(StoreError::Invariant(format!(
            "orders {} and {} are not opposite sides of one pair",
            buy.uuid, sell.uuid
        )));
    }

    let buy_price = buy.buy_price();
    let sell_price = sell.sell_price();
    if buy_price > sell_price {
        return Ok(None);
    }

    // Time priority: the earlier order's price wins.
    let price = if buy.pending_time <= sell.pending_time {
        buy_price
    } else {
        sell_price
    };

    let quantity = match (buy.is_buy_all, sell.is_buy_all) {
        // Both fill-to-destination: bounded by what each side can take,
        // in the same denomination.
        (true, true) => buy.des_count.min(sell.des_count * price),
        // Both fill-to-source: bounded by what each side can give.
        (false, false) => (buy.src_count * price).min(sell.src_count),
        (true, false) => buy.des_count.min(sell.src_count),
        (false, true) => buy.src_count.min(sell.des_count) * price,
    };

    let buy_side = fill_buy(buy, price, buy_price, quantity, now)?;
    let sell_side = fill_sell(sell, price, sell_price, quantity, now)?;
    let pair = format!("{},{}", buy_side.matched().uuid, sell_side.matched().uuid);

    Ok(Some(MatchPlan {
        price,
        quantity,
        buy: buy_side,
        sell: sell_side,
        pair,
    }))
}

/// The filled portion of a split, with provenance pointing back at the
/// parent and the parent's pre-split amounts preserved for audit.
fn spawn_child(parent: &Order, src_count: f64, des_count: f64, now: i64) -> Order {
    let mut child = Order::new(
        &parent.account,
        &parent.src_currency,
        round6(src_count),
        &parent.des_currency,
        round6(des_count),
        parent.is_buy_all,
        parent.expired_time,
        parent.pending_time,
    );
    child.pended_time = parent.pended_time;
    child.matched_time = now;
    child.final_cost = child.src_count;
    child.raw_uuid = parent.uuid.clone();
    child.raw_src_count = parent.src_count;
    child.raw_des_count = parent.des_count;
    child
}

fn fill_buy(
    buy: &Order,
    price: f64,
    buy_price: f64,
    quantity: f64,
    now: i64,
) -> Result<SideOutcome, StoreError> {
    let src_used = quantity / price;

    let residual = if buy.is_buy_all {
        buy.des_count - quantity
    } else {
        buy.src_count - src_used
    };
    if residual < -AMOUNT_EPSILON {
        return Err(StoreError::Invariant(format!(
            "buy order {} overfilled: residual {}",
            buy.uuid, residual
        )));
    }

    if residual > AMOUNT_EPSILON {
        let child = spawn_child(buy, src_used, quantity, now);
        let mut parent = buy.clone();
        if buy.is_buy_all {
            parent.des_count = round6(buy.des_count - quantity);
            parent.src_count = round6(parent.des_count / buy_price);
        } else {
            parent.src_count = round6(buy.src_count - src_used);
            parent.des_count = round6(parent.src_count * buy_price);
        }
        Ok(SideOutcome::Split { parent, child })
    } else {
        let mut order = buy.clone();
        order.final_cost = round6(src_used);
        order.matched_time = now;
        Ok(SideOutcome::Consumed { order })
    }
}

fn fill_sell(
    sell: &Order,
    price: f64,
    sell_price: f64,
    quantity: f64,
    now: i64,
) -> Result<SideOutcome, StoreError> {
    // The sell side's source is the buy side's destination, so the
    // executed quantity is its source consumption.
    let des_gained = quantity / price;

    let residual = if sell.is_buy_all {
        sell.des_count - des_gained
    } else {
        sell.src_count - quantity
    };
    if residual < -AMOUNT_EPSILON {
        return Err(StoreError::Invariant(format!(
            "sell order {} overfilled: residual {}",
            sell.uuid, residual
        )));
    }

    if residual > AMOUNT_EPSILON {
        let child = spawn_child(sell, quantity, des_gained, now);
        let mut parent = sell.clone();
        if sell.is_buy_all {
            parent.des_count = round6(sell.des_count - des_gained);
            parent.src_count = round6(parent.des_count * sell_price);
        } else {
            parent.src_count = round6(sell.src_count - quantity);
            parent.des_count = round6(parent.src_count / sell_price);
        }
        Ok(SideOutcome::Split { parent, child })
    } else {
        let mut order = sell.clone();
        order.final_cost = round6(quantity);
        order.matched_time = now;
        Ok(SideOutcome::Consumed { order })
    }
}

pub struct MatchDriver {
    store: Arc<OrderStore>,
    scale: f64,
}

impl MatchDriver {
    pub fn new(store: Arc<OrderStore>, scale: f64) -> Self {
        Self { store, scale }
    }

    /// One matching pass over every book pair currently in the store.
    /// Each pair is attempted at most once per pass.
    pub async fn run_once(&self) -> Result<(), DriverError> {
        let book_keys = self.store.book_keys().await?;
        let mut visited: HashSet<String> = HashSet::new();
        let now = now_unix();

        for key in book_keys {
            if visited.contains(&key) {
                continue;
            }

            let Some(buy_uuid) = self.store.top_of_book(&key).await? else {
                continue;
            };
            let Some(buy) = self.live_top(&buy_uuid, now).await? else {
                continue;
            };

            visited.insert(key.clone());
            let Some(reverse) = keys::book_reverse(&key) else {
                continue;
            };
            visited.insert(reverse.clone());

            let Some(sell_uuid) = self.store.top_of_book(&reverse).await? else {
                continue;
            };
            let Some(sell) = self.live_top(&sell_uuid, now).await? else {
                continue;
            };

            tracing::debug!(
                buy = %buy.uuid,
                sell = %sell.uuid,
                buy_price = buy.buy_price(),
                sell_price = sell.sell_price(),
                "considering cross"
            );

            let Some(plan) = cross(&buy, &sell, now)? else {
                continue;
            };

            self.store.raw().pipeline(plan.to_ops(self.scale)?).await?;
            metrics::record_match(&format!("{}:{}", buy.src_currency, buy.des_currency));
            tracing::info!(
                pair = %plan.pair,
                price = plan.price,
                quantity = plan.quantity,
                "orders matched"
            );
        }

        Ok(())
    }

    /// Load a top-of-book order, routing it through the expiry
    /// transition (and out of consideration) when its deadline passed.
    async fn live_top(&self, uuid: &str, now: i64) -> Result<Option<Order>, DriverError> {
        let Some(order) = self.store.try_get_order(uuid).await? else {
            return Ok(None);
        };
        if order.is_expired(now) {
            tracing::debug!(%uuid, "top of book expired");
            self.store.expire_order(uuid).await?;
            metrics::record_expiration();
            return Ok(None);
        }
        Ok(Some(order))
    }
}
