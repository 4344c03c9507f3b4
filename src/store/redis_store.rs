//! Redis-backed store.
//!
//! Connection management with automatic reconnection: operations run
//! through a retry wrapper that drops the cached connection on failure
//! and backs off before the next attempt. A connection error is fatal to
//! the calling worker's pass, never to the process.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreOp};

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

pub struct RedisStore {
    config: RedisStoreConfig,
    connection: Arc<RwLock<Option<ConnectionManager>>>,
    client: Client,
}

impl RedisStore {
    pub async fn new(config: RedisStoreConfig) -> Result<Self, RedisError> {
        let client = Client::open(config.url.as_str())?;

        let store = Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            client,
        };

        store.ensure_connected().await?;

        Ok(store)
    }

    pub async fn from_url(url: &str) -> Result<Self, RedisError> {
        Self::new(RedisStoreConfig {
            url: url.to_string(),
            ..Default::default()
        })
        .await
    }

    async fn ensure_connected(&self) -> Result<(), RedisError> {
        let mut conn = self.connection.write().await;
        if conn.is_none() {
            tracing::info!("establishing store connection to {}", self.config.url);
            let manager = ConnectionManager::new(self.client.clone()).await?;
            *conn = Some(manager);
            tracing::info!("store connection established");
        }
        Ok(())
    }

    async fn get_connection(&self) -> Result<ConnectionManager, RedisError> {
        self.ensure_connected().await?;
        let conn = self.connection.read().await;
        conn.clone()
            .ok_or_else(|| RedisError::from((redis::ErrorKind::IoError, "connection not available")))
    }

    async fn with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, StoreError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            match self.get_connection().await {
                Ok(conn) => match operation(conn).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        tracing::warn!(
                            "store operation failed (attempt {}/{}): {}",
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        last_error = Some(e);

                        // Drop the cached connection so the next attempt
                        // reconnects from scratch.
                        if attempt < self.config.max_retries - 1 {
                            let mut conn = self.connection.write().await;
                            *conn = None;
                            tokio::time::sleep(Duration::from_millis(
                                self.config.retry_delay_ms * (attempt as u64 + 1),
                            ))
                            .await;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "store connection failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                    last_error = Some(e);

                    if attempt < self.config.max_retries - 1 {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.retry_delay_ms * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(StoreError::Backend(last_error.unwrap_or_else(|| {
            RedisError::from((redis::ErrorKind::IoError, "max retries exceeded"))
        })))
    }

    pub async fn ping(&self) -> Result<bool, StoreError> {
        self.with_retry(|mut conn| async move {
            let result: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(result == "PONG")
        })
        .await
    }
}

fn apply_op(pipe: &mut redis::Pipeline, op: &StoreOp) {
    match op {
        StoreOp::Set { key, value } => {
            pipe.set(key, value).ignore();
        }
        StoreOp::Del { key } => {
            pipe.del(key).ignore();
        }
        StoreOp::SetAdd { key, member } => {
            pipe.sadd(key, member).ignore();
        }
        StoreOp::SetRem { key, member } => {
            pipe.srem(key, member).ignore();
        }
        StoreOp::SetMove { src, des, member } => {
            pipe.smove(src, des, member).ignore();
        }
        StoreOp::ZAdd { key, member, score } => {
            pipe.zadd(key, member, *score).ignore();
        }
        StoreOp::ZRem { key, member } => {
            pipe.zrem(key, member).ignore();
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.get(&key).await }
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let value = value.to_string();
            async move { conn.set(&key, &value).await }
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.del(&key).await }
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.exists(&key).await }
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.with_retry(|mut conn| {
            let pattern = pattern.to_string();
            async move { conn.keys(&pattern).await }
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move { conn.sadd(&key, &member).await }
        })
        .await
    }

    async fn set_rem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move { conn.srem(&key, &member).await }
        })
        .await
    }

    async fn set_move(&self, src: &str, des: &str, member: &str) -> Result<bool, StoreError> {
        self.with_retry(|mut conn| {
            let src = src.to_string();
            let des = des.to_string();
            let member = member.to_string();
            async move { conn.smove(&src, &des, &member).await }
        })
        .await
    }

    async fn set_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.spop(&key).await }
        })
        .await
    }

    async fn set_sample(&self, key: &str, count: i64) -> Result<Vec<String>, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.srandmember_multiple(&key, count.max(0) as usize).await }
        })
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.smembers(&key).await }
        })
        .await
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move { conn.sismember(&key, &member).await }
        })
        .await
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move { conn.zadd(&key, &member, score).await }
        })
        .await
    }

    async fn zset_rem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move { conn.zrem(&key, &member).await }
        })
        .await
    }

    async fn zset_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.zrange(&key, start, stop).await }
        })
        .await
    }

    async fn zset_rank(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let member = member.to_string();
            async move { conn.zrank(&key, &member).await }
        })
        .await
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        self.with_retry(|mut conn| {
            let ops = ops.clone();
            async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                for op in &ops {
                    apply_op(&mut pipe, op);
                }
                pipe.query_async::<_, ()>(&mut conn).await
            }
        })
        .await
    }
}
