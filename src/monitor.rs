//! Monitoring broadcast.
//!
//! Every mocked exchange is published to a [`Monitor`] on its own task so the
//! response path never waits on it. Ordering relative to the response reaching
//! the client is best-effort.

use crate::engine::MockRequest;
use crate::responder::MockResponse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Errors raised while publishing.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("no monitor is subscribed")]
    NoSubscribers,
}

/// One mocked request/response pair.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub request: MockRequest,
    pub response: MockResponse,
    pub recorded_at: DateTime<Utc>,
}

impl MonitorEvent {
    pub fn new(request: MockRequest, response: MockResponse) -> Self {
        Self {
            request,
            response,
            recorded_at: Utc::now(),
        }
    }
}

/// Receives copies of mocked exchanges.
#[async_trait]
pub trait Monitor: Send + Sync {
    async fn publish(&self, event: MonitorEvent) -> Result<(), MonitorError>;
}

/// Monitor backed by a broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelMonitor {
    tx: broadcast::Sender<MonitorEvent>,
}

impl ChannelMonitor {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to published exchanges.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelMonitor {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Monitor for ChannelMonitor {
    async fn publish(&self, event: MonitorEvent) -> Result<(), MonitorError> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| MonitorError::NoSubscribers)
    }
}

/// Handle on an in-flight broadcast.
#[derive(Debug)]
pub struct BroadcastHandle {
    task: JoinHandle<()>,
}

impl BroadcastHandle {
    /// Publish `event` after `delay` on a separate task.
    pub fn spawn(monitor: Arc<dyn Monitor>, event: MonitorEvent, delay: Duration) -> Self {
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let path = event.request.path.clone();
            if let Err(e) = monitor.publish(event).await {
                debug!(path = %path, error = %e, "Broadcast dropped");
            }
        });
        Self { task }
    }

    /// Stop the broadcast if it has not been published yet.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Wait for the broadcast; false if it was cancelled or panicked.
    pub async fn finished(self) -> bool {
        self.task.await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> MonitorEvent {
        MonitorEvent::new(MockRequest::new("GET", "/pets/1"), MockResponse::new(200))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let monitor = ChannelMonitor::default();
        let mut rx = monitor.subscribe();

        let handle = BroadcastHandle::spawn(Arc::new(monitor.clone()), event(), Duration::ZERO);
        assert!(handle.finished().await);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.request.path, "/pets/1");
        assert_eq!(received.response.status, 200);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_fatal() {
        let monitor = ChannelMonitor::default();
        assert!(matches!(
            monitor.publish(event()).await,
            Err(MonitorError::NoSubscribers)
        ));

        let handle = BroadcastHandle::spawn(Arc::new(monitor), event(), Duration::ZERO);
        assert!(handle.finished().await);
    }

    #[tokio::test]
    async fn test_cancelled_broadcast_is_never_published() {
        let monitor = ChannelMonitor::default();
        let mut rx = monitor.subscribe();

        let handle =
            BroadcastHandle::spawn(Arc::new(monitor), event(), Duration::from_secs(60));
        handle.cancel();
        assert!(!handle.finished().await);
        assert!(rx.try_recv().is_err());
    }
}
