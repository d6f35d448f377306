//! Outbound dispatch against configured endpoints.
//!
//! `ConfiguredSendProvider` is the runtime face of the frozen
//! [`EndpointRegistry`]: it resolves a message type to its destination,
//! obtains the live bus handle (triggering the lazy connect if needed),
//! and performs the send or request/response exchange.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::{FaultDetail, Reply, TransportError};
use crate::bus::{BusError, ConnectionManager};
use crate::message::Message;
use crate::topology::{EndpointRegistry, ResolveError};

/// Failures on the send path.
///
/// Typed so callers can tell "never configured" from "broker said no"
/// from "no answer" from "answer says no". There is no implicit retry
/// anywhere here; retrying a send is the caller's decision.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Send failed: {0}")]
    SendFailed(#[source] TransportError),

    #[error("No response within {timeout:?}")]
    RequestTimeout { timeout: Duration },

    #[error("Remote consumer faulted: {0}")]
    RemoteFault(FaultDetail),
}

/// Sender and request-client factory over the frozen endpoint registry
/// and the live bus.
///
/// Cheap to clone-construct per call site; all state is shared.
pub struct ConfiguredSendProvider {
    manager: Arc<ConnectionManager>,
    registry: Arc<EndpointRegistry>,
}

impl ConfiguredSendProvider {
    pub fn new(manager: Arc<ConnectionManager>, registry: Arc<EndpointRegistry>) -> Self {
        debug!(
            send_endpoints = registry.send_endpoint_count(),
            "Send provider ready"
        );
        Self { manager, registry }
    }

    /// Fire-and-forget send of `M`'s payload to its configured path.
    ///
    /// Connects lazily if the bus is not up yet; transport failures
    /// surface as [`SendError::SendFailed`] without retry.
    pub async fn send<M: Message>(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let key = M::type_key();
        let path = self.registry.send_path(&key)?.to_string();

        let connection = self.manager.get_connection(cancel).await?;
        let deliver = async {
            let sender = connection
                .open_sender(&path)
                .await
                .map_err(SendError::SendFailed)?;
            sender
                .send(&key, payload)
                .await
                .map_err(SendError::SendFailed)
        };

        // A stalled broker must not strand the caller; cancellation covers
        // the transport awaits too, not just the connection wait.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Bus(BusError::Cancelled)),
            result = deliver => result?,
        }

        debug!(message_type = %key, path = %path, "Message sent");
        Ok(())
    }

    /// Request/response exchange: send `Req`'s payload, await the
    /// correlated `Res` within its configured timeout.
    ///
    /// Fails [`SendError::RequestTimeout`] when no answer arrives in
    /// time and [`SendError::RemoteFault`] when the remote consumer
    /// answers with a fault. Cancellation aborts only this exchange.
    pub async fn request<Req: Message, Res: Message>(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, SendError> {
        let request_key = Req::type_key();
        let path = self.registry.send_path(&request_key)?.to_string();
        let timeout = self.registry.response_timeout(&Res::type_key())?;

        let connection = self.manager.get_connection(cancel).await?;
        let client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Bus(BusError::Cancelled)),
            opened = connection.open_request_client(&path, timeout) => {
                opened.map_err(SendError::SendFailed)?
            }
        };

        let exchange = client.request(&request_key, payload);
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(SendError::Bus(BusError::Cancelled)),
            outcome = tokio::time::timeout(timeout, exchange) => match outcome {
                Err(_) => return Err(SendError::RequestTimeout { timeout }),
                Ok(Err(error)) => return Err(SendError::SendFailed(error)),
                Ok(Ok(reply)) => reply,
            },
        };

        match reply {
            Reply::Success(payload) => {
                debug!(message_type = %request_key, path = %path, "Request answered");
                Ok(payload)
            }
            Reply::Fault(detail) => Err(SendError::RemoteFault(detail)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::config::BrokerConfig;
    use crate::message::MessageTypeKey;
    use crate::topology::HostingBuilder;

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

    fn provider_for(broker: Arc<MockBroker>, registry: EndpointRegistry) -> ConfiguredSendProvider {
        let manager = ConnectionManager::new(
            broker,
            BrokerConfig::for_test(),
            Default::default(),
        );
        ConfiguredSendProvider::new(Arc::new(manager), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_send_to_unconfigured_type_fails() {
        let provider = provider_for(Arc::new(MockBroker::new()), EndpointRegistry::default());

        let result = provider
            .send::<ICommand>(Bytes::new(), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(SendError::Resolve(ResolveError::UnconfiguredSendEndpoint(_)))
        ));
    }

    #[tokio::test]
    async fn test_send_publishes_to_configured_path() {
        let broker = Arc::new(MockBroker::new());

        let mut builder = HostingBuilder::new("app");
        builder.with_send_endpoint::<ICommand>("app_command").unwrap();
        let (registry, _) = builder.freeze().unwrap();

        let provider = provider_for(broker.clone(), registry);
        provider
            .send::<ICommand>(Bytes::from_static(b"payload"), &CancellationToken::new())
            .await
            .unwrap();

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].path, "app_command");
    }

    #[tokio::test]
    async fn test_send_with_cancelled_token_publishes_nothing() {
        let broker = Arc::new(MockBroker::new());

        let mut builder = HostingBuilder::new("app");
        builder.with_send_endpoint::<ICommand>("app_command").unwrap();
        let (registry, _) = builder.freeze().unwrap();
        let provider = provider_for(broker.clone(), registry);

        // Bring the bus up first so the token gates the transport awaits,
        // not the connection wait.
        provider
            .send::<ICommand>(Bytes::from_static(b"first"), &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = provider
            .send::<ICommand>(Bytes::from_static(b"second"), &cancel)
            .await;

        assert!(matches!(result, Err(SendError::Bus(BusError::Cancelled))));
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_request_fault_reply_surfaces_remote_fault() {
        let broker = Arc::new(MockBroker::new());
        broker
            .script_reply(
                "app_command",
                Reply::Fault(FaultDetail {
                    message: "boom".to_string(),
                    exception_type: Some("InvalidOperation".to_string()),
                    stack_trace: None,
                }),
            )
            .await;

        let mut builder = HostingBuilder::new("app");
        builder
            .with_request_response::<ICommand, IResponse>("app_command", None)
            .unwrap();
        let (registry, _) = builder.freeze().unwrap();

        let provider = provider_for(broker, registry);
        let result = provider
            .request::<ICommand, IResponse>(Bytes::new(), &CancellationToken::new())
            .await;

        match result {
            Err(SendError::RemoteFault(detail)) => {
                assert_eq!(detail.message, "boom");
            }
            other => panic!("expected RemoteFault, got {:?}", other.map(|_| ())),
        }
    }
}
