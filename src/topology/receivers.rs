//! Frozen receive-endpoint topology.
//!
//! Built by [`HostingBuilder`](super::HostingBuilder), applied once by the
//! connection manager when the bus comes up. None of these types expose
//! mutation; change requires a new builder.

use std::time::Duration;

use serde::Deserialize;

use crate::consumer::ConsumerBinding;

/// Retry behavior for a queue's consumers.
///
/// Opaque to the core: the broker client applies it when declaring the
/// receive endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Number of redelivery attempts after the first failure.
    pub retry_count: u32,
    /// Delay between attempts.
    #[serde(with = "duration_secs")]
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A policy with the given attempt count and a fixed backoff.
    pub fn fixed(retry_count: u32, backoff: Duration) -> Self {
        Self {
            retry_count,
            backoff,
        }
    }
}

/// Broker-level tuning for a receive endpoint.
///
/// Passed through to the broker client unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    /// Consumer prefetch window, if the broker supports one.
    pub prefetch_count: Option<u16>,
    /// Whether the queue survives broker restarts.
    pub durable: bool,
    /// Whether the queue is exclusive to this connection.
    pub exclusive: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            prefetch_count: None,
            durable: true,
            exclusive: false,
        }
    }
}

/// A queue plus everything bound to it.
#[derive(Debug, Clone)]
pub struct QueueDeclaration {
    /// Broker queue name.
    pub queue_name: String,
    /// Consumers receiving from this queue.
    pub bindings: Vec<ConsumerBinding>,
    /// Optional retry policy for the queue's consumers.
    pub retry_policy: Option<RetryPolicy>,
    /// Optional broker-level endpoint tuning.
    pub options: Option<EndpointOptions>,
}

/// Immutable set of receive-endpoint declarations, one per queue.
///
/// Iteration order is deterministic (sorted by queue name).
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfigurationSet {
    queues: Vec<QueueDeclaration>,
}

impl ReceiverConfigurationSet {
    pub(crate) fn new(queues: Vec<QueueDeclaration>) -> Self {
        Self { queues }
    }

    /// Number of declared queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Look up a declaration by queue name.
    pub fn get(&self, queue_name: &str) -> Option<&QueueDeclaration> {
        self.queues.iter().find(|q| q.queue_name == queue_name)
    }

    /// Iterate declarations in queue-name order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueDeclaration> {
        self.queues.iter()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
