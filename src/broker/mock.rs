//! In-memory broker for testing.
//!
//! Records every connect attempt, declared receiver, publish and stop
//! call, and can be scripted to refuse the first N connects or to answer
//! requests with a canned reply. Requests without a scripted reply never
//! complete, which is how request-timeout behavior is exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::config::BrokerConfig;
use crate::message::MessageTypeKey;
use crate::topology::{QueueDeclaration, RetryPolicy};

use super::{BrokerClient, BrokerConnection, BusHandle, Reply, RequestClient, Sender, TransportError};

/// A publish observed by the mock broker.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    /// Destination queue path.
    pub path: String,
    /// Message type tag.
    pub message_type: MessageTypeKey,
    /// Payload bytes.
    pub payload: Bytes,
}

/// A receive endpoint declared on a mock connection.
#[derive(Debug, Clone)]
pub struct DeclaredReceiver {
    /// Queue name.
    pub queue_name: String,
    /// Names of the bound consumers.
    pub consumer_names: Vec<String>,
    /// Retry policy handed to the broker, if any.
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Default)]
struct MockState {
    published: RwLock<Vec<RecordedPublish>>,
    replies: RwLock<HashMap<String, Reply>>,
    connections: RwLock<Vec<Arc<MockConnection>>>,
}

/// Scriptable in-memory broker.
#[derive(Default)]
pub struct MockBroker {
    connect_attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that refuses the first `n` connection attempts with
    /// [`TransportError::Unreachable`], then accepts.
    pub fn failing(n: usize) -> Self {
        let broker = Self::default();
        broker.failures_remaining.store(n, Ordering::SeqCst);
        broker
    }

    /// Total connection attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Script the reply every request client bound to `path` will return.
    pub async fn script_reply(&self, path: impl Into<String>, reply: Reply) {
        self.state.replies.write().await.insert(path.into(), reply);
    }

    /// All publishes recorded so far, in order.
    pub async fn published(&self) -> Vec<RecordedPublish> {
        self.state.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.state.published.read().await.len()
    }

    /// Connections handed out so far.
    pub async fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.state.connections.read().await.clone()
    }

    pub async fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.state.connections.read().await.last().cloned()
    }

    /// Receive endpoints declared across every connection.
    pub async fn total_declared_receivers(&self) -> usize {
        let connections = self.connections().await;
        let mut total = 0;
        for conn in connections {
            total += conn.declared_receivers().await.len();
        }
        total
    }

    /// Stop calls observed across every connection.
    pub async fn total_stop_calls(&self) -> usize {
        self.connections()
            .await
            .iter()
            .map(|c| c.stop_calls())
            .sum()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self, _config: &BrokerConfig) -> Result<BusHandle, TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Unreachable(
                "mock broker refused connection".to_string(),
            ));
        }

        let conn = Arc::new(MockConnection {
            state: self.state.clone(),
            declared: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        });
        self.state.connections.write().await.push(conn.clone());
        Ok(conn)
    }
}

/// A live mock session.
pub struct MockConnection {
    state: Arc<MockState>,
    declared: RwLock<Vec<DeclaredReceiver>>,
    started: AtomicBool,
    stop_calls: AtomicUsize,
}

impl MockConnection {
    /// Receive endpoints declared on this connection.
    pub async fn declared_receivers(&self) -> Vec<DeclaredReceiver> {
        self.declared.read().await.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn declare_receiver(
        &self,
        declaration: &QueueDeclaration,
    ) -> Result<(), TransportError> {
        self.declared.write().await.push(DeclaredReceiver {
            queue_name: declaration.queue_name.clone(),
            consumer_names: declaration
                .bindings
                .iter()
                .map(|b| b.consumer_name.clone())
                .collect(),
            retry_policy: declaration.retry_policy.clone(),
        });
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_sender(&self, path: &str) -> Result<Arc<dyn Sender>, TransportError> {
        Ok(Arc::new(MockSender {
            state: self.state.clone(),
            path: path.to_string(),
        }))
    }

    async fn open_request_client(
        &self,
        path: &str,
        _timeout: Duration,
    ) -> Result<Arc<dyn RequestClient>, TransportError> {
        Ok(Arc::new(MockRequestClient {
            state: self.state.clone(),
            path: path.to_string(),
        }))
    }
}

struct MockSender {
    state: Arc<MockState>,
    path: String,
}

#[async_trait]
impl Sender for MockSender {
    async fn send(
        &self,
        message_type: &MessageTypeKey,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.state.published.write().await.push(RecordedPublish {
            path: self.path.clone(),
            message_type: message_type.clone(),
            payload,
        });
        Ok(())
    }
}

struct MockRequestClient {
    state: Arc<MockState>,
    path: String,
}

#[async_trait]
impl RequestClient for MockRequestClient {
    async fn request(
        &self,
        message_type: &MessageTypeKey,
        payload: Bytes,
    ) -> Result<Reply, TransportError> {
        self.state.published.write().await.push(RecordedPublish {
            path: self.path.clone(),
            message_type: message_type.clone(),
            payload,
        });

        let reply = self.state.replies.read().await.get(&self.path).cloned();
        match reply {
            Some(reply) => Ok(reply),
            // No scripted reply: the remote side never answers.
            None => futures::future::pending().await,
        }
    }
}
