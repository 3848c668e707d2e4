//! Creation of senders from a transport selection.

use deadpool_redis::Pool;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::kubernetes::{ClusterJobGateway, KubernetesMessageSender, KubernetesSenderConfig};
use crate::redis::{RedisKeys, RedisMessageSender};
use crate::{Endpoint, MessageSender};

/// A selected transport together with the resources it needs.
pub enum TransportConfig {
    /// Every message becomes a Kubernetes job.
    Kubernetes {
        gateway: Arc<dyn ClusterJobGateway>,
        config: KubernetesSenderConfig,
    },
    /// Every message is pushed onto a Redis list.
    Redis { pool: Pool, key_prefix: String },
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes { config, .. } => f
                .debug_struct("Kubernetes")
                .field("namespace", &config.namespace)
                .field("image_name", &config.image_name)
                .finish_non_exhaustive(),
            Self::Redis { key_prefix, .. } => f
                .debug_struct("Redis")
                .field("key_prefix", key_prefix)
                .finish_non_exhaustive(),
        }
    }
}

impl TransportConfig {
    /// Name of the transport for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Kubernetes { .. } => "kubernetes",
            Self::Redis { .. } => "redis",
        }
    }
}

/// Creates a sender for messages with payload `T` to an endpoint.
pub fn create_sender<T>(endpoint: Endpoint, transport: TransportConfig) -> Arc<dyn MessageSender<T>>
where
    T: Serialize + Send + Sync + 'static,
{
    info!(endpoint = %endpoint, transport = transport.name(), "Creating message sender");

    match transport {
        TransportConfig::Kubernetes { gateway, config } => {
            Arc::new(KubernetesMessageSender::new(gateway, config, endpoint))
        }
        TransportConfig::Redis { pool, key_prefix } => {
            Arc::new(RedisMessageSender::new(pool, RedisKeys::new(key_prefix), endpoint))
        }
    }
}
