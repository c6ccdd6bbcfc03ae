//! Periodic liveness pings for open connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

use crate::registry::ConnectionRegistry;

/// Spawn a background task that sends periodic Ping frames to every open
/// connection, until `shutdown` flips to true.
pub fn start_heartbeat(
    registry: Arc<ConnectionRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let count = registry.ping_all().await;
                    tracing::debug!(count, "Real-time heartbeat ping");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Frame;

    #[tokio::test]
    async fn test_pings_until_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_id, mut rx) = registry.register().await;
        let (tx, shutdown) = watch::channel(false);

        let handle = start_heartbeat(registry.clone(), Duration::from_millis(10), shutdown);
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(frame, Some(Frame::Ping));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
