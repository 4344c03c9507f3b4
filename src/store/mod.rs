//! Store adapter.
//!
//! The remote in-memory store is the only shared mutable resource in the
//! system: queues, books and order records all live behind the [`Store`]
//! trait. Every cross-queue move is expressed as a [`StoreOp`] batch and
//! executed atomically through [`Store::pipeline`].

use async_trait::async_trait;

pub mod keys;
pub mod memory;
pub mod orders;
pub mod redis_store;

pub use memory::MemoryStore;
pub use orders::OrderStore;
pub use redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("malformed record under {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// One mutation inside a pipelined transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Set { key: String, value: String },
    Del { key: String },
    SetAdd { key: String, member: String },
    SetRem { key: String, member: String },
    SetMove { src: String, des: String, member: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
}

/// Contract over the coordination store. Sorted-set ranges are read
/// low-to-high; `set_sample` returns up to `count` distinct members
/// without removing them.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// Keys matching a glob pattern (only `prefix*` forms are used).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_rem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    /// Returns false when the member was not present in `src`.
    async fn set_move(&self, src: &str, des: &str, member: &str) -> Result<bool, StoreError>;
    async fn set_pop(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_sample(&self, key: &str, count: i64) -> Result<Vec<String>, StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    async fn zset_rem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    /// Members between ranks `start` and `stop` inclusive; negative
    /// indices count from the end, as the store protocol does.
    async fn zset_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;
    async fn zset_rank(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError>;

    /// Execute `ops` as one transaction: either every op applies or the
    /// whole pipeline fails.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;
}
