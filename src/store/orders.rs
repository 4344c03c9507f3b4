//! Typed order operations over the coordination store.
//!
//! Every lifecycle transition that touches more than one key runs as a
//! single pipelined transaction. Result applications are guarded on the
//! feeder-set membership of the order, so replaying a ledger result after
//! it has been applied is a no-op.

use std::sync::Arc;

use crate::models::{Order, OrderStatus};

use super::keys;
use super::{Store, StoreError, StoreOp};

pub struct OrderStore {
    store: Arc<dyn Store>,
}

impl OrderStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Direct access for callers composing their own pipelines.
    pub fn raw(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ==================== Order records ====================

    pub async fn get_order(&self, uuid: &str) -> Result<Order, StoreError> {
        self.try_get_order(uuid)
            .await?
            .ok_or_else(|| StoreError::OrderNotFound(uuid.to_string()))
    }

    pub async fn try_get_order(&self, uuid: &str) -> Result<Option<Order>, StoreError> {
        let key = keys::order(uuid);
        match self.store.get(&key).await? {
            Some(js) => serde_json::from_str(&js)
                .map(Some)
                .map_err(|source| StoreError::Codec { key, source }),
            None => Ok(None),
        }
    }

    pub async fn put_order(&self, order: &Order) -> Result<(), StoreError> {
        self.store
            .set(&keys::order(&order.uuid), &encode_order(order)?)
            .await
    }

    pub async fn save_metadata(&self, uuid: &str, message: &str) -> Result<(), StoreError> {
        let mut order = self.get_order(uuid).await?;
        order.metadata = message.to_string();
        self.put_order(&order).await
    }

    // ==================== Submission ====================

    /// Accept a fresh order: persist the record and enqueue it for the
    /// balance lock.
    pub async fn submit(&self, order: &Order) -> Result<(), StoreError> {
        self.store
            .pipeline(vec![
                set_order_op(order)?,
                StoreOp::SetAdd {
                    key: keys::PENDING.to_string(),
                    member: order.uuid.clone(),
                },
            ])
            .await
    }

    // ==================== Lock results ====================

    /// Lock acknowledged: stamp `pended_time` and move the order from
    /// `pending` into its book, the pend-success set and the owner's
    /// history, atomically.
    pub async fn book_order(&self, uuid: &str, now: i64) -> Result<(), StoreError> {
        if !self.store.set_contains(keys::PENDING, uuid).await? {
            // Already applied (or purged); replays are no-ops.
            return Ok(());
        }

        let mut order = self.get_order(uuid).await?;
        order.pended_time = now;

        let book_key = keys::book(&order.src_currency, &order.des_currency);
        let score = order.score();

        self.store
            .pipeline(vec![
                set_order_op(&order)?,
                StoreOp::SetRem {
                    key: keys::PENDING.to_string(),
                    member: uuid.to_string(),
                },
                StoreOp::ZAdd {
                    key: book_key,
                    member: uuid.to_string(),
                    score,
                },
                StoreOp::SetAdd {
                    key: keys::PEND_SUCCESS.to_string(),
                    member: uuid.to_string(),
                },
                StoreOp::SetAdd {
                    key: keys::user(&order.account),
                    member: uuid.to_string(),
                },
            ])
            .await
    }

    /// Lock refused for one order: record the reason and park it in the
    /// pend-fail set.
    pub async fn fail_pending(&self, uuid: &str, reason: &str) -> Result<(), StoreError> {
        if !self.store.set_contains(keys::PENDING, uuid).await? {
            return Ok(());
        }

        let mut order = self.get_order(uuid).await?;
        order.metadata = reason.to_string();

        self.store
            .pipeline(vec![
                set_order_op(&order)?,
                StoreOp::SetMove {
                    src: keys::PENDING.to_string(),
                    des: keys::PEND_FAIL.to_string(),
                    member: uuid.to_string(),
                },
            ])
            .await
    }

    /// A lock-failed order never made it into the system; drop its record
    /// and set memberships.
    pub async fn clear_failed_order(&self, uuid: &str) -> Result<(), StoreError> {
        self.store.del(&keys::order(uuid)).await?;
        self.store.set_rem(keys::PENDING, uuid).await?;
        self.store.set_rem(keys::PEND_FAIL, uuid).await?;
        Ok(())
    }

    // ==================== Books ====================

    pub async fn book_keys(&self) -> Result<Vec<String>, StoreError> {
        self.store.keys(keys::BOOK_PATTERN).await
    }

    /// Rank-0 member of a book, if any.
    pub async fn top_of_book(&self, book_key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .zset_range(book_key, 0, 0)
            .await?
            .into_iter()
            .next())
    }

    pub async fn book_range(&self, book_key: &str, count: i64) -> Result<Vec<Order>, StoreError> {
        let uuids = self
            .store
            .zset_range(book_key, 0, (count.max(1) - 1) as isize)
            .await?;
        let mut orders = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if let Some(order) = self.try_get_order(&uuid).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    // ==================== Settlement results ====================

    /// Exchange acknowledged for a `"buy,sell"` pair: both orders leave
    /// `matched` for `finished`, terminal status and counterparty set.
    pub async fn finish_pair(&self, pair: &str, now: i64) -> Result<(), StoreError> {
        if !self.store.set_contains(keys::MATCHED, pair).await? {
            return Ok(());
        }

        let Some((buy_uuid, sell_uuid)) = pair.split_once(',') else {
            return Err(StoreError::Invariant(format!(
                "malformed matched pair {:?}",
                pair
            )));
        };

        let mut buy = self.get_order(buy_uuid).await?;
        let mut sell = self.get_order(sell_uuid).await?;

        for order in [&buy, &sell] {
            if !order.status.may_transition(OrderStatus::Finished) {
                return Err(StoreError::Invariant(format!(
                    "order {} cannot finish from status {:?}",
                    order.uuid, order.status
                )));
            }
        }

        buy.status = OrderStatus::Finished;
        buy.matched_uuid = sell_uuid.to_string();
        buy.finished_time = now;

        sell.status = OrderStatus::Finished;
        sell.matched_uuid = buy_uuid.to_string();
        sell.finished_time = now;

        self.store
            .pipeline(vec![
                StoreOp::SetRem {
                    key: keys::MATCHED.to_string(),
                    member: pair.to_string(),
                },
                StoreOp::SetAdd {
                    key: keys::FINISHED.to_string(),
                    member: buy_uuid.to_string(),
                },
                StoreOp::SetAdd {
                    key: keys::FINISHED.to_string(),
                    member: sell_uuid.to_string(),
                },
                set_order_op(&buy)?,
                set_order_op(&sell)?,
            ])
            .await
    }

    // ==================== Expiry ====================

    /// Move a live order out of its book into the expired set with
    /// terminal status, atomically.
    pub async fn expire_order(&self, uuid: &str) -> Result<(), StoreError> {
        let mut order = self.get_order(uuid).await?;
        if !order.status.may_transition(OrderStatus::Expired) {
            return Err(StoreError::Invariant(format!(
                "order {} cannot expire from status {:?}",
                order.uuid, order.status
            )));
        }
        order.status = OrderStatus::Expired;

        self.store
            .pipeline(vec![
                StoreOp::ZRem {
                    key: keys::book(&order.src_currency, &order.des_currency),
                    member: uuid.to_string(),
                },
                set_order_op(&order)?,
                StoreOp::SetAdd {
                    key: keys::EXPIRED.to_string(),
                    member: uuid.to_string(),
                },
            ])
            .await
    }

    /// Balance released on-chain for an expired order.
    pub async fn expire_done(&self, uuid: &str) -> Result<(), StoreError> {
        self.store
            .set_move(keys::EXPIRED, keys::EXPIRED_SUCCESS, uuid)
            .await?;
        Ok(())
    }

    // ==================== Cancellation ====================

    /// REST entry: an order is cancellable only while it sits in its
    /// book. Returns false when it does not.
    pub async fn request_cancel(&self, uuid: &str) -> Result<bool, StoreError> {
        let order = self.get_order(uuid).await?;
        let book_key = keys::book(&order.src_currency, &order.des_currency);

        if self.store.zset_rank(&book_key, uuid).await?.is_none() {
            return Ok(false);
        }

        self.store
            .pipeline(vec![
                StoreOp::ZRem {
                    key: book_key,
                    member: uuid.to_string(),
                },
                StoreOp::SetAdd {
                    key: keys::CANCELING.to_string(),
                    member: uuid.to_string(),
                },
            ])
            .await?;
        Ok(true)
    }

    /// Unlock acknowledged: the cancellation is final.
    pub async fn cancel_done(&self, uuid: &str) -> Result<(), StoreError> {
        if !self.store.set_contains(keys::CANCELING, uuid).await? {
            return Ok(());
        }

        let mut order = self.get_order(uuid).await?;
        if !order.status.may_transition(OrderStatus::Cancelled) {
            return Err(StoreError::Invariant(format!(
                "order {} cannot cancel from status {:?}",
                order.uuid, order.status
            )));
        }
        order.status = OrderStatus::Cancelled;

        self.store
            .pipeline(vec![
                StoreOp::SetMove {
                    src: keys::CANCELING.to_string(),
                    des: keys::CANCEL_SUCCESS.to_string(),
                    member: uuid.to_string(),
                },
                set_order_op(&order)?,
            ])
            .await
    }

    /// Unlock refused: the order goes back into its book at its original
    /// score, the failure reason is recorded.
    pub async fn restore_cancel_failed(&self, uuid: &str, reason: &str) -> Result<(), StoreError> {
        if !self.store.set_contains(keys::CANCELING, uuid).await? {
            return Ok(());
        }

        let mut order = self.get_order(uuid).await?;
        order.metadata = reason.to_string();

        let book_key = keys::book(&order.src_currency, &order.des_currency);
        let score = order.score();

        self.store
            .pipeline(vec![
                set_order_op(&order)?,
                StoreOp::SetRem {
                    key: keys::CANCELING.to_string(),
                    member: uuid.to_string(),
                },
                StoreOp::ZAdd {
                    key: book_key,
                    member: uuid.to_string(),
                    score,
                },
                StoreOp::SetAdd {
                    key: keys::CANCEL_FAIL.to_string(),
                    member: uuid.to_string(),
                },
            ])
            .await
    }

    // ==================== Queries ====================

    /// All orders an account has touched, most recently booked first.
    pub async fn orders_by_user(&self, account: &str) -> Result<Vec<Order>, StoreError> {
        let uuids = self.store.set_members(&keys::user(account)).await?;
        let mut orders = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            if let Some(order) = self.try_get_order(&uuid).await? {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| b.pended_time.cmp(&a.pended_time));
        Ok(orders)
    }

    pub async fn last_price(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .store
            .get(keys::LAST_PRICE)
            .await?
            .and_then(|v| v.parse().ok()))
    }
}

pub(crate) fn encode_order(order: &Order) -> Result<String, StoreError> {
    serde_json::to_string(order).map_err(|source| StoreError::Codec {
        key: keys::order(&order.uuid),
        source,
    })
}

pub(crate) fn set_order_op(order: &Order) -> Result<StoreOp, StoreError> {
    Ok(StoreOp::Set {
        key: keys::order(&order.uuid),
        value: encode_order(order)?,
    })
}
