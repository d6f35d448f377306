//! Broker client collaborator.
//!
//! The wire protocol lives behind these traits: the core only asks a
//! broker to connect, declare receive endpoints, start/stop, and open
//! send or request handles. Implementations:
//! - `MockBroker`: in-memory broker for tests
//! - `AmqpBroker`: RabbitMQ via lapin (feature `amqp`)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::BrokerConfig;
use crate::message::MessageTypeKey;
use crate::topology::QueueDeclaration;

pub mod mock;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use mock::MockBroker;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;

/// Failures at the broker boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The broker is unreachable (connection refused, DNS failure,
    /// socket reset during handshake). This is the class the connection
    /// manager retries indefinitely.
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    /// The broker rejected an operation.
    #[error("Broker protocol error: {0}")]
    Protocol(String),

    /// The channel or connection was closed underneath an operation.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Detail carried by a fault reply from a remote consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultDetail {
    /// Remote failure description.
    pub message: String,
    /// Remote error/exception type, when known.
    pub exception_type: Option<String>,
    /// Remote stack trace, when the broker forwards one.
    pub stack_trace: Option<String>,
}

impl fmt::Display for FaultDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exception_type {
            Some(kind) => write!(f, "{}: {}", kind, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of a request/response exchange, as reported by the broker.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The remote consumer answered.
    Success(Bytes),
    /// The remote consumer failed and said so.
    Fault(FaultDetail),
}

/// Entry point to a broker: opens connections.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Open a connection to the broker described by `config`.
    ///
    /// Unreachable brokers fail with [`TransportError::Unreachable`]; the
    /// caller (the connection manager) owns retry.
    async fn connect(&self, config: &BrokerConfig) -> Result<BusHandle, TransportError>;
}

/// A live broker session.
///
/// Owned exclusively by the connection manager; everyone else sees it
/// through a shared read-only [`BusHandle`].
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Declare a receive endpoint: the queue, its consumer bindings, and
    /// the retry policy/options to apply. Called for every declaration
    /// before [`start`](Self::start).
    async fn declare_receiver(&self, declaration: &QueueDeclaration)
        -> Result<(), TransportError>;

    /// Begin delivering messages to the declared receivers.
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop the session. Called exactly once, on shutdown.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Open a send handle for a queue path.
    async fn open_sender(&self, path: &str) -> Result<Arc<dyn Sender>, TransportError>;

    /// Open a request/response client bound to a queue path and timeout.
    async fn open_request_client(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn RequestClient>, TransportError>;
}

/// Fire-and-forget send handle for one destination.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Transmit one payload, tagged with its message type.
    async fn send(
        &self,
        message_type: &MessageTypeKey,
        payload: Bytes,
    ) -> Result<(), TransportError>;
}

/// Correlated request/response client for one destination.
///
/// The timeout is enforced by the caller; implementations may suspend
/// indefinitely waiting for a reply.
#[async_trait]
pub trait RequestClient: Send + Sync {
    /// Send one request and await its correlated reply.
    async fn request(
        &self,
        message_type: &MessageTypeKey,
        payload: Bytes,
    ) -> Result<Reply, TransportError>;
}

/// Shared handle to the live broker session.
pub type BusHandle = Arc<dyn BrokerConnection>;
