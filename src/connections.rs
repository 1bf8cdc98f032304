// ABOUTME: Session connection manager - per-project WebSocket subscribers and fan-out.
// ABOUTME: Each subscriber owns a bounded outbound queue drained by its writer task.

use async_trait::async_trait;
use newhorse_core::{EventSink, OutboundMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Subscribers = HashMap<u64, mpsc::Sender<OutboundMessage>>;

/// Tracks every open chat connection, grouped by project
#[derive(Clone, Default)]
pub struct ConnectionManager {
    projects: Arc<Mutex<HashMap<String, Subscribers>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns its id and the queue its writer drains
    pub fn connect(&self, project_id: &str, buffer: usize) -> (u64, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        let subscribers = projects.entry(project_id.to_string()).or_default();
        subscribers.insert(id, tx);
        tracing::info!(
            project_id = %project_id,
            connection_id = id,
            subscribers = subscribers.len(),
            "Chat client connected"
        );
        (id, rx)
    }

    /// Remove a subscriber; returns how many remain for the project
    pub fn disconnect(&self, project_id: &str, id: u64) -> usize {
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        let remaining = match projects.get_mut(project_id) {
            Some(subscribers) => {
                subscribers.remove(&id);
                subscribers.len()
            }
            None => 0,
        };
        if remaining == 0 {
            projects.remove(project_id);
        }
        tracing::info!(
            project_id = %project_id,
            connection_id = id,
            remaining,
            "Chat client disconnected"
        );
        remaining
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        let projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        projects.get(project_id).map_or(0, HashMap::len)
    }

    /// Deliver to every subscriber of the project without waiting. A
    /// subscriber whose queue is full is dropped; its writer drains what
    /// it has and the socket closes, so the client reconnects and replays.
    pub fn broadcast(&self, project_id: &str, message: OutboundMessage) {
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = projects.get_mut(project_id) else {
            return;
        };

        subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(project_id = %project_id, connection_id = *id, "Subscriber lagging, dropping it");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(project_id = %project_id, connection_id = *id, "Dropping closed subscriber");
                false
            }
        });
        if subscribers.is_empty() {
            projects.remove(project_id);
        }
    }

    /// Sink that fans a project's events out to its subscribers
    pub fn sink(&self, project_id: &str) -> ProjectSink {
        ProjectSink {
            manager: self.clone(),
            project_id: project_id.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ProjectSink {
    manager: ConnectionManager,
    project_id: String,
}

#[async_trait]
impl EventSink for ProjectSink {
    async fn deliver(&self, message: OutboundMessage) {
        self.manager.broadcast(&self.project_id, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_only_project_subscribers() {
        let manager = ConnectionManager::new();
        let (_a, mut rx_a) = manager.connect("p1", 8);
        let (_b, mut rx_b) = manager.connect("p1", 8);
        let (_c, mut rx_c) = manager.connect("p2", 8);

        manager.sink("p1").deliver(OutboundMessage::busy()).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_counts_and_prunes_closed() {
        let manager = ConnectionManager::new();
        let (a, _rx_a) = manager.connect("p1", 8);
        let (_b, rx_b) = manager.connect("p1", 8);
        assert_eq!(manager.subscriber_count("p1"), 2);

        drop(rx_b);
        manager.broadcast("p1", OutboundMessage::busy());
        assert_eq!(manager.subscriber_count("p1"), 1);

        assert_eq!(manager.disconnect("p1", a), 0);
        assert_eq!(manager.subscriber_count("p1"), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_dropped_without_stalling_others() {
        let manager = ConnectionManager::new();
        let (_slow, _rx_slow) = manager.connect("p1", 1);
        let (_fast, mut rx_fast) = manager.connect("p1", 8);
        let sink = manager.sink("p1");

        // The slow queue holds one message and is never drained
        for _ in 0..3 {
            tokio::time::timeout(
                std::time::Duration::from_secs(1),
                sink.deliver(OutboundMessage::busy()),
            )
            .await
            .expect("delivery blocked on a full subscriber");
        }

        assert_eq!(manager.subscriber_count("p1"), 1);
        let mut received = 0;
        while rx_fast.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }
}
