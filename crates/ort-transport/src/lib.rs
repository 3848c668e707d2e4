//! # ORT Transport
//!
//! Delivery of messages to the ORT workers and the orchestrator.
//!
//! Worker messages are turned into Kubernetes jobs whose labels carry the
//! identity of the run (see [`labels`]); orchestrator notifications can also
//! travel through a Redis list. Everything that talks to the cluster goes
//! through the [`ClusterJobGateway`] seam.

pub mod endpoint;
pub mod factory;
pub mod kubernetes;
pub mod labels;
pub mod message;
pub mod redis;
pub mod sender;

pub use endpoint::Endpoint;
pub use factory::{create_sender, TransportConfig};
pub use kubernetes::{
    ClusterJobGateway, KubeJobGateway, KubernetesMessageSender, KubernetesSenderConfig,
};
#[cfg(any(test, feature = "test-util"))]
pub use kubernetes::{GatewayOperation, InMemoryJobGateway};
pub use message::{Message, MessageHeader, OrchestratorMessage};
pub use sender::MessageSender;
