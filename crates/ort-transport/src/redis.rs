//! Redis transport: messages are pushed onto one list per endpoint.

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use ort_config::RedisConfig;
use ort_core::{OrtError, OrtResult};
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::{Endpoint, Message, MessageSender};

/// Create a Redis connection pool.
///
/// # Errors
///
/// Fails if the URL is invalid or the server does not answer a `PING`.
pub async fn create_pool(config: &RedisConfig) -> OrtResult<Pool> {
    info!("Creating Redis connection pool for message transport...");

    let pool = Config::from_url(&config.url)
        .builder()
        .map_err(|e| OrtError::configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| OrtError::configuration(format!("Failed to create pool: {e}")))?;

    let mut conn = pool.get().await.map_err(redis_error)?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(redis_error)?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

fn redis_error(err: impl std::fmt::Display) -> OrtError {
    OrtError::transport(format!("Redis: {err}"))
}

/// Redis key builder for the transport.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// List holding the pending messages of an endpoint.
    #[must_use]
    pub fn queue(&self, endpoint: Endpoint) -> String {
        format!("{}:queue:{}", self.prefix, endpoint.config_prefix())
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("ort")
    }
}

/// [`MessageSender`] pushing JSON encoded messages onto a Redis list.
///
/// Consumers pop from the other end, so messages are read in send order.
pub struct RedisMessageSender {
    pool: Pool,
    keys: RedisKeys,
    endpoint: Endpoint,
}

impl RedisMessageSender {
    #[must_use]
    pub fn new(pool: Pool, keys: RedisKeys, endpoint: Endpoint) -> Self {
        Self {
            pool,
            keys,
            endpoint,
        }
    }
}

#[async_trait]
impl<T> MessageSender<T> for RedisMessageSender
where
    T: Serialize + Send + Sync + 'static,
{
    fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    async fn send(&self, message: Message<T>) -> OrtResult<()> {
        let key = self.keys.queue(self.endpoint);
        let payload = serde_json::to_string(&message)?;

        let result: OrtResult<()> = async {
            let mut conn = self.pool.get().await.map_err(redis_error)?;
            let _: () = conn.lpush(&key, &payload).await.map_err(redis_error)?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => debug!(
                endpoint = %self.endpoint,
                queue = %key,
                ort_run_id = message.header.ort_run_id,
                "Pushed message"
            ),
            Err(e) => error!(
                endpoint = %self.endpoint,
                queue = %key,
                ort_run_id = message.header.ort_run_id,
                error = %e,
                "Failed to push message"
            ),
        }

        result
    }
}
