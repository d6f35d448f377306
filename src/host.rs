//! Host lifecycle glue.
//!
//! Ties the lazy bus into an application's startup/shutdown sequence:
//! `start` forces the first connection so the process only reports ready
//! with the bus up, `stop` tears it down.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, ConnectionManager};

/// Start/stop facade over the connection manager.
pub struct BusHost {
    manager: Arc<ConnectionManager>,
}

impl BusHost {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Bring the bus up, waiting through connect retries.
    ///
    /// Suspends until the broker is reachable or `cancel` fires.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        self.manager.get_connection(cancel).await.map(|_| ())
    }

    /// Shut the bus down. Always completes; stop failures are logged by
    /// the manager.
    pub async fn stop(&self) {
        self.manager.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::bus::BusState;
    use crate::config::BrokerConfig;
    use crate::topology::ReceiverConfigurationSet;

    #[tokio::test]
    async fn test_start_connects_and_stop_disposes() {
        let broker = Arc::new(MockBroker::new());
        let manager = Arc::new(ConnectionManager::new(
            broker.clone(),
            BrokerConfig::for_test(),
            ReceiverConfigurationSet::default(),
        ));
        let host = BusHost::new(manager.clone());

        host.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(manager.state().await, BusState::Connected);

        host.stop().await;
        assert_eq!(manager.state().await, BusState::Disposed);
        assert_eq!(broker.total_stop_calls().await, 1);
    }
}
