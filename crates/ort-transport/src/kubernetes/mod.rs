//! Kubernetes transport: jobs as messages.

mod config;
mod gateway;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod sender;

pub use config::{
    parse_annotations, parse_pvc_mounts, parse_secret_mounts, resolve_placeholders, split_quoted,
    KubernetesSenderConfig, PvcVolumeMount, ResourceSettings, SecretVolumeMount,
};
pub use gateway::{ClusterJobGateway, KubeJobGateway};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{GatewayOperation, InMemoryJobGateway};
pub use sender::KubernetesMessageSender;
