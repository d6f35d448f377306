//! Frozen send-endpoint registry.

use std::collections::HashMap;
use std::time::Duration;

use crate::message::{Message, MessageTypeKey};

/// Lookup failure against the registry.
///
/// These are programmer errors (a type was never registered); they are
/// surfaced immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("No send endpoint configured for message type: {0}")]
    UnconfiguredSendEndpoint(MessageTypeKey),

    #[error("No response timeout configured for message type: {0}")]
    UnconfiguredResponseTimeout(MessageTypeKey),
}

/// Immutable mapping from message type to send destination and, for
/// response types, to a request timeout.
///
/// Built once by [`HostingBuilder::freeze`](super::HostingBuilder::freeze);
/// read-only afterwards, so it is shared via `Arc` with no locking.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    send_paths: HashMap<MessageTypeKey, String>,
    response_timeouts: HashMap<MessageTypeKey, Duration>,
}

impl EndpointRegistry {
    pub(crate) fn new(
        send_paths: HashMap<MessageTypeKey, String>,
        response_timeouts: HashMap<MessageTypeKey, Duration>,
    ) -> Self {
        Self {
            send_paths,
            response_timeouts,
        }
    }

    /// Resolve the queue path a message type is sent to.
    pub fn send_path(&self, key: &MessageTypeKey) -> Result<&str, ResolveError> {
        self.send_paths
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ResolveError::UnconfiguredSendEndpoint(key.clone()))
    }

    /// Resolve the configured timeout for a response type.
    pub fn response_timeout(&self, key: &MessageTypeKey) -> Result<Duration, ResolveError> {
        self.response_timeouts
            .get(key)
            .copied()
            .ok_or_else(|| ResolveError::UnconfiguredResponseTimeout(key.clone()))
    }

    /// Typed variant of [`send_path`](Self::send_path).
    pub fn send_path_for<M: Message>(&self) -> Result<&str, ResolveError> {
        self.send_path(&M::type_key())
    }

    /// Typed variant of [`response_timeout`](Self::response_timeout).
    pub fn response_timeout_for<M: Message>(&self) -> Result<Duration, ResolveError> {
        self.response_timeout(&M::type_key())
    }

    /// Number of configured send endpoints.
    pub fn send_endpoint_count(&self) -> usize {
        self.send_paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> MessageTypeKey {
        MessageTypeKey::new("tests", name)
    }

    fn registry() -> EndpointRegistry {
        let mut paths = HashMap::new();
        paths.insert(key("A"), "queue_a".to_string());
        paths.insert(key("B"), "queue_b".to_string());
        let mut timeouts = HashMap::new();
        timeouts.insert(key("BReply"), Duration::from_secs(10));
        EndpointRegistry::new(paths, timeouts)
    }

    #[test]
    fn test_distinct_types_resolve_to_their_own_paths() {
        let registry = registry();
        assert_eq!(registry.send_path(&key("A")).unwrap(), "queue_a");
        assert_eq!(registry.send_path(&key("B")).unwrap(), "queue_b");
    }

    #[test]
    fn test_unconfigured_send_endpoint() {
        let registry = registry();
        assert!(matches!(
            registry.send_path(&key("Missing")),
            Err(ResolveError::UnconfiguredSendEndpoint(_))
        ));
    }

    #[test]
    fn test_response_timeout_lookup() {
        let registry = registry();
        assert_eq!(
            registry.response_timeout(&key("BReply")).unwrap(),
            Duration::from_secs(10)
        );
        assert!(matches!(
            registry.response_timeout(&key("A")),
            Err(ResolveError::UnconfiguredResponseTimeout(_))
        ));
    }
}
