//! Startup-time topology accumulator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::consumer::{Consumer, ConsumerBinding};
use crate::message::{Message, MessageTypeKey};
use crate::naming;

use super::receivers::{EndpointOptions, QueueDeclaration, ReceiverConfigurationSet, RetryPolicy};
use super::registry::EndpointRegistry;

/// Timeout applied to request/response endpoints that do not specify one.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration mistakes caught while building topology.
///
/// All of these are fatal to process initialization; nothing here is
/// retried or silently overwritten.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Retry policy already configured for queue: {queue}")]
    DuplicateRetryPolicy { queue: String },

    #[error("Endpoint options already configured for queue: {queue}")]
    DuplicateEndpointOptions { queue: String },

    #[error("Send endpoint already configured for message type: {key}")]
    DuplicateSendEndpoint { key: MessageTypeKey },

    #[error("Response timeout already configured for message type: {key}")]
    DuplicateResponseTimeout { key: MessageTypeKey },

    #[error("Builder has already been frozen")]
    AlreadyFrozen,

    #[error("Queue name must not be empty")]
    EmptyQueueName,
}

#[derive(Default)]
struct ReceiverEntry {
    bindings: Vec<ConsumerBinding>,
    retry_policy: Option<RetryPolicy>,
    options: Option<EndpointOptions>,
}

/// Mutable accumulator for broker topology, consumed exactly once.
///
/// Applications call the `consume*` and `with_*` methods during startup,
/// then [`freeze`](Self::freeze) the builder into the immutable
/// [`EndpointRegistry`] and [`ReceiverConfigurationSet`] snapshots handed
/// to the connection manager. The snapshots have no mutators; the builder
/// itself additionally rejects use after freezing.
pub struct HostingBuilder {
    application_name: String,
    receivers: BTreeMap<String, ReceiverEntry>,
    send_paths: HashMap<MessageTypeKey, String>,
    response_timeouts: HashMap<MessageTypeKey, Duration>,
    frozen: bool,
}

impl HostingBuilder {
    /// Create a builder for the named application.
    ///
    /// The application name seeds convention-based queue naming; there is
    /// no process-wide default.
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            receivers: BTreeMap::new(),
            send_paths: HashMap::new(),
            response_timeouts: HashMap::new(),
            frozen: false,
        }
    }

    /// Name of the application owning this topology.
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// The conventional queue name for a message type owned by this
    /// application.
    pub fn conventional_queue_name<M: Message>(&self) -> String {
        naming::queue_name(&self.application_name, &M::type_key())
    }

    fn check_mutable(&self) -> Result<(), TopologyError> {
        if self.frozen {
            return Err(TopologyError::AlreadyFrozen);
        }
        Ok(())
    }

    /// Bind a consumer of `M` to the given queue.
    ///
    /// Multiple consumers may share one queue; the queue's declaration is
    /// created on first use.
    pub fn consume<M: Message>(
        &mut self,
        queue_name: impl Into<String>,
        consumer: Arc<dyn Consumer>,
    ) -> Result<&mut Self, TopologyError> {
        self.consume_with::<M>(queue_name, consumer, None, None)
    }

    /// Bind a consumer of `M` with an optional retry policy and endpoint
    /// options for the queue.
    ///
    /// At most one retry policy and one options value may be set per
    /// queue; a second registration of either fails rather than
    /// overwriting the first.
    pub fn consume_with<M: Message>(
        &mut self,
        queue_name: impl Into<String>,
        consumer: Arc<dyn Consumer>,
        retry_policy: Option<RetryPolicy>,
        options: Option<EndpointOptions>,
    ) -> Result<&mut Self, TopologyError> {
        self.check_mutable()?;
        let queue_name = queue_name.into();
        if queue_name.is_empty() {
            return Err(TopologyError::EmptyQueueName);
        }

        let entry = self.receivers.entry(queue_name.clone()).or_default();

        if retry_policy.is_some() && entry.retry_policy.is_some() {
            return Err(TopologyError::DuplicateRetryPolicy { queue: queue_name });
        }
        if options.is_some() && entry.options.is_some() {
            return Err(TopologyError::DuplicateEndpointOptions { queue: queue_name });
        }

        let binding = ConsumerBinding::new(M::type_key(), consumer);
        debug!(
            queue = %queue_name,
            consumer = %binding.consumer_name,
            message_type = %binding.message_type,
            "Registered consumer"
        );

        entry.bindings.push(binding);
        if retry_policy.is_some() {
            entry.retry_policy = retry_policy;
        }
        if options.is_some() {
            entry.options = options;
        }

        Ok(self)
    }

    /// Bind a consumer of `M` to its conventional queue,
    /// `{application}_{snake(M)}`.
    pub fn consume_by_convention<M: Message>(
        &mut self,
        consumer: Arc<dyn Consumer>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<&mut Self, TopologyError> {
        let queue = self.conventional_queue_name::<M>();
        self.consume_with::<M>(queue, consumer, retry_policy, None)
    }

    /// Bind a consumer to the error queue (`{queue}_error`) holding
    /// messages of `M` that failed all processing attempts.
    pub fn consume_error<M: Message>(
        &mut self,
        queue_name: &str,
        consumer: Arc<dyn Consumer>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<&mut Self, TopologyError> {
        self.consume_with::<M>(
            naming::error_queue_name(queue_name),
            consumer,
            retry_policy,
            None,
        )
    }

    /// Bind an error consumer against a remote application's conventional
    /// queue name.
    pub fn consume_error_by_convention<M: Message>(
        &mut self,
        remote_application_name: &str,
        consumer: Arc<dyn Consumer>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<&mut Self, TopologyError> {
        let queue = naming::queue_name(remote_application_name, &M::type_key());
        self.consume_error::<M>(&queue, consumer, retry_policy)
    }

    /// Bind a consumer to the fault queue (`{queue}_fault`) carrying
    /// fault events for `M`.
    ///
    /// Faults are only published for fire-and-forget messages; a
    /// request/response exchange reports failure through the reply.
    pub fn consume_fault<M: Message>(
        &mut self,
        queue_name: &str,
        consumer: Arc<dyn Consumer>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<&mut Self, TopologyError> {
        self.consume_with::<M>(
            naming::fault_queue_name(queue_name),
            consumer,
            retry_policy,
            None,
        )
    }

    /// Bind a fault consumer to this application's conventional fault
    /// queue for `M`.
    pub fn consume_fault_by_convention<M: Message>(
        &mut self,
        consumer: Arc<dyn Consumer>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<&mut Self, TopologyError> {
        let queue = self.conventional_queue_name::<M>();
        self.consume_fault::<M>(&queue, consumer, retry_policy)
    }

    /// Declare the fire-and-forget destination for `M`.
    pub fn with_send_endpoint<M: Message>(
        &mut self,
        queue_path: impl Into<String>,
    ) -> Result<&mut Self, TopologyError> {
        self.check_mutable()?;
        let queue_path = queue_path.into();
        let queue_path = queue_path.trim_start_matches('/');
        if queue_path.is_empty() {
            return Err(TopologyError::EmptyQueueName);
        }

        let key = M::type_key();
        if self.send_paths.contains_key(&key) {
            return Err(TopologyError::DuplicateSendEndpoint { key });
        }

        debug!(message_type = %key, path = %queue_path, "Registered send endpoint");
        self.send_paths.insert(key, queue_path.to_string());
        Ok(self)
    }

    /// Declare the destination for `M` by convention against a remote
    /// application.
    pub fn with_send_endpoint_by_convention<M: Message>(
        &mut self,
        remote_application_name: &str,
    ) -> Result<&mut Self, TopologyError> {
        let path = naming::queue_name(remote_application_name, &M::type_key());
        self.with_send_endpoint::<M>(path)
    }

    /// Declare a request/response endpoint: the request's destination
    /// plus a timeout for the paired response type.
    ///
    /// Without an explicit timeout, [`DEFAULT_RESPONSE_TIMEOUT`] applies.
    pub fn with_request_response<Req: Message, Res: Message>(
        &mut self,
        request_queue_path: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<&mut Self, TopologyError> {
        self.with_send_endpoint::<Req>(request_queue_path)?;

        let key = Res::type_key();
        if self.response_timeouts.contains_key(&key) {
            return Err(TopologyError::DuplicateResponseTimeout { key });
        }

        self.response_timeouts
            .insert(key, timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT));
        Ok(self)
    }

    /// Convention-named variant of
    /// [`with_request_response`](Self::with_request_response).
    pub fn with_request_response_by_convention<Req: Message, Res: Message>(
        &mut self,
        remote_application_name: &str,
        timeout: Option<Duration>,
    ) -> Result<&mut Self, TopologyError> {
        let path = naming::queue_name(remote_application_name, &Req::type_key());
        self.with_request_response::<Req, Res>(path, timeout)
    }

    /// Freeze the accumulated topology into its immutable snapshots.
    ///
    /// Exactly one freeze succeeds per builder; afterwards every
    /// operation, including another freeze, fails with
    /// [`TopologyError::AlreadyFrozen`].
    pub fn freeze(
        &mut self,
    ) -> Result<(EndpointRegistry, ReceiverConfigurationSet), TopologyError> {
        self.check_mutable()?;
        self.frozen = true;

        let queues = std::mem::take(&mut self.receivers)
            .into_iter()
            .map(|(queue_name, entry)| QueueDeclaration {
                queue_name,
                bindings: entry.bindings,
                retry_policy: entry.retry_policy,
                options: entry.options,
            })
            .collect();

        let registry = EndpointRegistry::new(
            std::mem::take(&mut self.send_paths),
            std::mem::take(&mut self.response_timeouts),
        );

        Ok((registry, ReceiverConfigurationSet::new(queues)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerError, InboundMessage};
    use async_trait::async_trait;

    struct ICommand;
    impl Message for ICommand {
        fn type_key() -> MessageTypeKey {
            MessageTypeKey::new("tests", "ICommand")
        }
    }

    struct IResponse;
    impl Message for IResponse {
        fn type_key() -> MessageTypeKey {
            MessageTypeKey::new("tests", "IResponse")
        }
    }

    struct NullConsumer;

    #[async_trait]
    impl Consumer for NullConsumer {
        fn name(&self) -> &str {
            "NullConsumer"
        }

        async fn consume(&self, _message: InboundMessage) -> Result<(), ConsumerError> {
            Ok(())
        }
    }

    #[test]
    fn test_two_consumers_on_one_queue_allowed() {
        let mut builder = HostingBuilder::new("app");
        builder
            .consume::<ICommand>("queue", Arc::new(NullConsumer))
            .unwrap();
        builder
            .consume::<ICommand>("queue", Arc::new(NullConsumer))
            .unwrap();

        let (_, receivers) = builder.freeze().unwrap();
        assert_eq!(receivers.get("queue").unwrap().bindings.len(), 2);
    }

    #[test]
    fn test_second_retry_policy_rejected() {
        let retry = RetryPolicy::fixed(3, Duration::from_millis(100));
        let mut builder = HostingBuilder::new("app");
        builder
            .consume_with::<ICommand>("queue", Arc::new(NullConsumer), Some(retry.clone()), None)
            .unwrap();

        let result =
            builder.consume_with::<ICommand>("queue", Arc::new(NullConsumer), Some(retry), None);
        assert_eq!(
            result.err(),
            Some(TopologyError::DuplicateRetryPolicy {
                queue: "queue".to_string()
            })
        );
    }

    #[test]
    fn test_second_endpoint_options_rejected() {
        let mut builder = HostingBuilder::new("app");
        builder
            .consume_with::<ICommand>(
                "queue",
                Arc::new(NullConsumer),
                None,
                Some(EndpointOptions::default()),
            )
            .unwrap();

        let result = builder.consume_with::<ICommand>(
            "queue",
            Arc::new(NullConsumer),
            None,
            Some(EndpointOptions::default()),
        );
        assert!(matches!(
            result,
            Err(TopologyError::DuplicateEndpointOptions { .. })
        ));
    }

    #[test]
    fn test_duplicate_send_endpoint_rejected() {
        let mut builder = HostingBuilder::new("app");
        builder.with_send_endpoint::<ICommand>("queue").unwrap();

        let result = builder.with_send_endpoint::<ICommand>("other");
        assert!(matches!(
            result,
            Err(TopologyError::DuplicateSendEndpoint { .. })
        ));
    }

    #[test]
    fn test_duplicate_response_timeout_rejected() {
        let mut builder = HostingBuilder::new("app");
        builder
            .with_request_response::<ICommand, IResponse>("queue", None)
            .unwrap();

        struct OtherRequest;
        impl Message for OtherRequest {
            fn type_key() -> MessageTypeKey {
                MessageTypeKey::new("tests", "OtherRequest")
            }
        }

        let result = builder.with_request_response::<OtherRequest, IResponse>("other", None);
        assert!(matches!(
            result,
            Err(TopologyError::DuplicateResponseTimeout { .. })
        ));
    }

    #[test]
    fn test_request_response_default_timeout() {
        let mut builder = HostingBuilder::new("app");
        builder
            .with_request_response::<ICommand, IResponse>("queue", None)
            .unwrap();

        let (registry, _) = builder.freeze().unwrap();
        assert_eq!(
            registry.response_timeout(&IResponse::type_key()).unwrap(),
            DEFAULT_RESPONSE_TIMEOUT
        );
    }

    #[test]
    fn test_leading_slash_trimmed() {
        let mut builder = HostingBuilder::new("app");
        builder.with_send_endpoint::<ICommand>("/queue").unwrap();

        let (registry, _) = builder.freeze().unwrap();
        assert_eq!(registry.send_path(&ICommand::type_key()).unwrap(), "queue");
    }

    #[test]
    fn test_convention_names() {
        let mut builder = HostingBuilder::new("app");
        assert_eq!(builder.conventional_queue_name::<ICommand>(), "app_command");

        builder
            .with_send_endpoint_by_convention::<ICommand>("remote")
            .unwrap();
        let (registry, _) = builder.freeze().unwrap();
        assert_eq!(
            registry.send_path(&ICommand::type_key()).unwrap(),
            "remote_command"
        );
    }

    #[test]
    fn test_error_and_fault_queues_by_convention() {
        let mut builder = HostingBuilder::new("app");
        builder
            .consume_error_by_convention::<ICommand>("remote", Arc::new(NullConsumer), None)
            .unwrap();
        builder
            .consume_fault_by_convention::<ICommand>(Arc::new(NullConsumer), None)
            .unwrap();

        let (_, receivers) = builder.freeze().unwrap();
        assert!(receivers.get("remote_command_error").is_some());
        assert!(receivers.get("app_command_fault").is_some());
    }

    #[test]
    fn test_freeze_twice_fails() {
        let mut builder = HostingBuilder::new("app");
        builder.freeze().unwrap();

        assert_eq!(builder.freeze().err(), Some(TopologyError::AlreadyFrozen));
        assert_eq!(builder.freeze().err(), Some(TopologyError::AlreadyFrozen));
    }

    #[test]
    fn test_mutation_after_freeze_fails() {
        let mut builder = HostingBuilder::new("app");
        builder.freeze().unwrap();

        let result = builder.consume::<ICommand>("queue", Arc::new(NullConsumer));
        assert!(matches!(result, Err(TopologyError::AlreadyFrozen)));

        let result = builder.with_send_endpoint::<ICommand>("queue");
        assert!(matches!(result, Err(TopologyError::AlreadyFrozen)));
    }
}
