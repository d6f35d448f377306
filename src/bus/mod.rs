//! Bus lifecycle management.
//!
//! One `ConnectionManager` per process owns the single broker connection.
//! The connection is created lazily on first access, retrying a fixed
//! backoff for as long as the broker is unreachable, and torn down exactly
//! once on disposal. All state transitions go through one mutex:
//!
//! `Idle → Connecting → Connected → Disposing → Disposed`
//!
//! with no back-transitions except the retry loop inside `Connecting`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, BusHandle, TransportError};
use crate::config::BrokerConfig;
use crate::topology::ReceiverConfigurationSet;

/// Fallback delay between failed connection attempts.
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Lifecycle failures surfaced to callers.
///
/// An unreachable broker is deliberately absent here: connect failures
/// are retried inside the manager and show up to callers only as
/// continued waiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Connection manager has been disposed")]
    Disposed,

    #[error("Wait for connection was cancelled")]
    Cancelled,
}

/// Read-only snapshot of the manager's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Idle,
    Connecting,
    Connected,
    Disposing,
    Disposed,
}

enum State {
    Idle,
    /// A connect attempt is in flight; waiters subscribe to the channel
    /// and re-check state when it fires.
    Connecting(watch::Receiver<bool>),
    Connected(BusHandle),
    Disposing,
    Disposed,
}

struct Shared {
    client: Arc<dyn BrokerClient>,
    config: BrokerConfig,
    receivers: ReceiverConfigurationSet,
    state: Mutex<State>,
}

/// Owner of the single broker connection.
///
/// Concurrent [`get_connection`](Self::get_connection) calls collapse
/// into one physical connect attempt; topology is fully declared before
/// the handle becomes observable; disposal stops the connection exactly
/// once.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    backoff: Duration,
}

impl ConnectionManager {
    /// Create a manager over a broker client and frozen topology.
    ///
    /// The backoff between failed attempts comes from
    /// `config.connect_backoff_secs`; override it with
    /// [`with_backoff`](Self::with_backoff).
    pub fn new(
        client: Arc<dyn BrokerClient>,
        config: BrokerConfig,
        receivers: ReceiverConfigurationSet,
    ) -> Self {
        for queue in receivers.iter() {
            info!(
                queue = %queue.queue_name,
                consumers = ?queue.bindings.iter().map(|b| b.consumer_name.as_str()).collect::<Vec<_>>(),
                has_retry_policy = queue.retry_policy.is_some(),
                "Receive endpoint configured"
            );
        }

        let backoff = if config.connect_backoff_secs == 0 {
            DEFAULT_CONNECT_BACKOFF
        } else {
            Duration::from_secs(config.connect_backoff_secs)
        };

        Self {
            shared: Arc::new(Shared {
                client,
                config,
                receivers,
                state: Mutex::new(State::Idle),
            }),
            backoff,
        }
    }

    /// Override the delay between failed connection attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> BusState {
        match &*self.shared.state.lock().await {
            State::Idle => BusState::Idle,
            State::Connecting(_) => BusState::Connecting,
            State::Connected(_) => BusState::Connected,
            State::Disposing => BusState::Disposing,
            State::Disposed => BusState::Disposed,
        }
    }

    /// Get the live bus handle, connecting first if necessary.
    ///
    /// While the broker is unreachable this suspends, retrying behind the
    /// scenes; callers wanting bounded waiting cancel via `cancel`, which
    /// aborts only their wait. The in-flight attempt keeps running for
    /// other callers and completes into the shared state.
    pub async fn get_connection(&self, cancel: &CancellationToken) -> Result<BusHandle, BusError> {
        loop {
            let mut rx = {
                let mut state = self.shared.state.lock().await;
                match &*state {
                    State::Connected(handle) => return Ok(handle.clone()),
                    State::Disposing | State::Disposed => return Err(BusError::Disposed),
                    State::Connecting(rx) => rx.clone(),
                    State::Idle => {
                        let (tx, rx) = watch::channel(false);
                        *state = State::Connecting(rx.clone());

                        let shared = self.shared.clone();
                        let backoff = self.backoff;
                        tokio::spawn(async move {
                            connect_with_retry(shared, tx, backoff).await;
                        });

                        rx
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(BusError::Cancelled),
                // A closed channel means the attempt resolved; either way,
                // loop around and re-read the state.
                _ = rx.changed() => {}
            }
        }
    }

    /// Stop the connection and refuse all further use.
    ///
    /// Idempotent: concurrent calls stop the underlying connection exactly
    /// once. Stop failures are logged and swallowed; shutdown always
    /// completes. An attempt still in flight is allowed to finish and is
    /// then stopped by the connect task itself.
    pub async fn dispose(&self) {
        let handle = {
            let mut state = self.shared.state.lock().await;
            match std::mem::replace(&mut *state, State::Disposing) {
                State::Connected(handle) => Some(handle),
                State::Connecting(_) => {
                    debug!("Disposed while a connection attempt was in flight");
                    *state = State::Disposed;
                    return;
                }
                State::Disposing | State::Disposed => {
                    *state = State::Disposed;
                    return;
                }
                State::Idle => {
                    *state = State::Disposed;
                    return;
                }
            }
        };

        if let Some(handle) = handle {
            if let Err(error) = handle.stop().await {
                warn!(%error, "Failed to stop broker connection during shutdown");
            } else {
                info!("Broker connection stopped");
            }
        }

        *self.shared.state.lock().await = State::Disposed;
    }
}

/// Connect, declare the frozen topology, and start the connection,
/// retrying with a fixed backoff until the broker cooperates.
///
/// Runs detached from any caller: cancelling a waiter never cancels the
/// attempt. Only a fully-declared, started connection is published.
async fn connect_with_retry(shared: Arc<Shared>, tx: watch::Sender<bool>, backoff: Duration) {
    let handle = loop {
        if matches!(
            *shared.state.lock().await,
            State::Disposing | State::Disposed
        ) {
            let _ = tx.send(true);
            return;
        }

        match try_connect(&shared).await {
            Ok(handle) => break handle,
            Err(TransportError::Unreachable(reason)) => {
                warn!(%reason, backoff = ?backoff, "Broker unreachable, retrying");
            }
            Err(error) => {
                warn!(%error, backoff = ?backoff, "Connection attempt failed, retrying");
            }
        }

        tokio::time::sleep(backoff).await;
    };

    let publish = {
        let mut state = shared.state.lock().await;
        match &*state {
            State::Disposing | State::Disposed => false,
            _ => {
                *state = State::Connected(handle.clone());
                true
            }
        }
    };

    if publish {
        info!(
            uri = %shared.config.uri,
            queues = shared.receivers.len(),
            "Bus connected"
        );
    } else {
        // Disposal won the race; tear the fresh connection down.
        if let Err(error) = handle.stop().await {
            warn!(%error, "Failed to stop connection established during disposal");
        }
    }

    let _ = tx.send(true);
}

async fn try_connect(shared: &Shared) -> Result<BusHandle, TransportError> {
    let handle = shared.client.connect(&shared.config).await?;

    for declaration in shared.receivers.iter() {
        handle.declare_receiver(declaration).await?;
        debug!(queue = %declaration.queue_name, "Receive endpoint declared");
    }

    handle.start().await?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    fn manager(broker: Arc<MockBroker>) -> ConnectionManager {
        ConnectionManager::new(
            broker,
            BrokerConfig::for_test(),
            ReceiverConfigurationSet::default(),
        )
        .with_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let manager = manager(Arc::new(MockBroker::new()));
        assert_eq!(manager.state().await, BusState::Idle);
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connected() {
        let broker = Arc::new(MockBroker::new());
        let manager = manager(broker.clone());

        manager
            .get_connection(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(manager.state().await, BusState::Connected);
        assert_eq!(broker.connect_attempts(), 1);
        assert!(broker.last_connection().await.unwrap().is_started());
    }

    #[tokio::test]
    async fn test_second_call_reuses_handle() {
        let broker = Arc::new(MockBroker::new());
        let manager = manager(broker.clone());
        let cancel = CancellationToken::new();

        manager.get_connection(&cancel).await.unwrap();
        manager.get_connection(&cancel).await.unwrap();
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_get_connection_after_dispose_fails() {
        let broker = Arc::new(MockBroker::new());
        let manager = manager(broker);
        let cancel = CancellationToken::new();

        manager.get_connection(&cancel).await.unwrap();
        manager.dispose().await;
        assert_eq!(manager.state().await, BusState::Disposed);

        assert_eq!(
            manager.get_connection(&cancel).await.err(),
            Some(BusError::Disposed)
        );
    }

    #[tokio::test]
    async fn test_cancelled_waiter_gets_cancelled_error() {
        // Broker that never accepts within the test window.
        let broker = Arc::new(MockBroker::failing(usize::MAX));
        let manager = manager(broker);

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            manager.get_connection(&cancel).await.err(),
            Some(BusError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_dispose_before_connect_never_connects() {
        let broker = Arc::new(MockBroker::new());
        let manager = manager(broker.clone());

        manager.dispose().await;
        assert_eq!(manager.state().await, BusState::Disposed);
        assert_eq!(broker.connect_attempts(), 0);
    }
}
