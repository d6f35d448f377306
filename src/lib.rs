//! bushost - Convention-driven broker hosting
//!
//! A configuration layer over a message-broker client: applications
//! declare consumers and typed send endpoints at startup, freeze that
//! topology, and the crate lazily opens and owns a single retrying
//! connection ("bus") to the broker, resolving destinations at send time.
//!
//! Wiring order mirrors the lifecycle:
//!
//! 1. [`topology::HostingBuilder`] accumulates declarations, then
//!    `freeze()` yields the immutable [`topology::EndpointRegistry`] and
//!    [`topology::ReceiverConfigurationSet`].
//! 2. [`bus::ConnectionManager`] consumes the receiver set and owns the
//!    connection: lazy connect with fixed-backoff retry, topology fully
//!    declared before the handle is published, exactly-once disposal.
//! 3. [`send::ConfiguredSendProvider`] consumes the registry at runtime
//!    for fire-and-forget sends and request/response exchanges.
//!
//! The broker itself sits behind the traits in [`broker`]; the crate
//! ships an in-memory [`broker::MockBroker`] and, behind the `amqp`
//! feature, a RabbitMQ client.

pub mod broker;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod host;
pub mod message;
pub mod naming;
pub mod send;
pub mod topology;

pub use broker::{BrokerClient, BrokerConnection, BusHandle, TransportError};
pub use bus::{BusError, BusState, ConnectionManager};
pub use config::BrokerConfig;
pub use consumer::{Consumer, ConsumerError, InboundMessage};
pub use host::BusHost;
pub use message::{Message, MessageTypeKey};
pub use send::{ConfiguredSendProvider, SendError};
pub use topology::{
    EndpointOptions, EndpointRegistry, HostingBuilder, ReceiverConfigurationSet, RetryPolicy,
    TopologyError,
};
