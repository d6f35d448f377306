//! Consumer seam.
//!
//! Consumers are registered against queue names at startup and invoked by
//! the broker client when a message arrives. The crate treats payloads as
//! opaque bytes; deserialization belongs to the consumer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::message::MessageTypeKey;

/// A message delivered to a consumer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Queue the message was consumed from.
    pub queue: String,
    /// Logical type of the message, as tagged by the sender.
    pub message_type: MessageTypeKey,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

/// Failure reported by a consumer.
///
/// The broker client decides what happens next (retry per the queue's
/// policy, then dead-letter).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ConsumerError {
    /// Human-readable failure description.
    pub message: String,
}

impl ConsumerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A handler bound to a receive endpoint.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Stable name identifying this consumer in topology and logs.
    fn name(&self) -> &str;

    /// Process one inbound message.
    async fn consume(&self, message: InboundMessage) -> Result<(), ConsumerError>;
}

/// A consumer bound to a queue for a specific message type.
#[derive(Clone)]
pub struct ConsumerBinding {
    /// Name of the bound consumer (from [`Consumer::name`]).
    pub consumer_name: String,
    /// Message type this binding handles.
    pub message_type: MessageTypeKey,
    /// The consumer instance.
    pub consumer: Arc<dyn Consumer>,
}

impl ConsumerBinding {
    pub fn new(message_type: MessageTypeKey, consumer: Arc<dyn Consumer>) -> Self {
        Self {
            consumer_name: consumer.name().to_string(),
            message_type,
            consumer,
        }
    }
}

impl fmt::Debug for ConsumerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBinding")
            .field("consumer_name", &self.consumer_name)
            .field("message_type", &self.message_type)
            .finish()
    }
}
