//! The sending side of a transport.

use async_trait::async_trait;
use ort_core::OrtResult;

use crate::{Endpoint, Message};

/// Sends messages with payload `T` to one endpoint.
///
/// A returned error means the message was not handed over to the transport;
/// implementations log the failure before returning it.
#[async_trait]
pub trait MessageSender<T>: Send + Sync
where
    T: Send + 'static,
{
    /// The endpoint this sender delivers to.
    fn endpoint(&self) -> Endpoint;

    /// Sends a message.
    async fn send(&self, message: Message<T>) -> OrtResult<()>;
}
