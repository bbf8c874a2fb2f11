/// Project-scoped event hub for live change notifications
///
/// This module provides:
/// - Coarse "project changed" events derived from committed drawing changes
/// - A hub that fans events out to per-subscriber bounded queues
/// - Subscription handles that unregister themselves when dropped
use crate::errors::DaemonResult;
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use qcflow_core::{
    ActorId, ChangeNotifier, DrawingChange, DrawingId, ProjectId, Stage, WorkflowError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bounded queue size per subscriber
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// A change notification. Clients treat it as a hint and re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_id: ProjectId,
    pub drawing_id: DrawingId,
    pub stage: Stage,
    pub version: i64,
    pub actor_id: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
}

impl From<&DrawingChange> for HubEvent {
    fn from(change: &DrawingChange) -> Self {
        HubEvent {
            id: Uuid::new_v4(),
            event_type: change.kind.as_str().to_string(),
            project_id: change.project_id,
            drawing_id: change.drawing_id,
            stage: change.stage,
            version: change.version,
            actor_id: change.actor_id,
            timestamp: change.timestamp,
        }
    }
}

/// Statistics about hub usage
#[derive(Debug, Clone, Default)]
pub struct EventHubStats {
    pub events_published: u64,
    pub deliveries: u64,
    pub subscribers_dropped: u64,
    pub total_subscriptions: u64,
    pub active_subscriptions: usize,
    pub events_by_type: HashMap<String, u64>,
}

struct Subscriber {
    actor_id: ActorId,
    tx: mpsc::Sender<HubEvent>,
}

/// Event hub: `project_id -> {subscription id -> subscriber}`
pub struct EventHub {
    capacity: usize,
    projects: RwLock<HashMap<ProjectId, HashMap<Uuid, Subscriber>>>,
    stats: Mutex<EventHubStats>,
    closed: AtomicBool,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EventHub {
    /// Create a new event hub
    pub fn new(capacity: usize) -> Self {
        EventHub {
            capacity: capacity.max(1),
            projects: RwLock::new(HashMap::new()),
            stats: Mutex::new(EventHubStats::default()),
            closed: AtomicBool::new(false),
            metrics: None,
        }
    }

    /// Create a hub that also reports to a metrics collector
    pub fn with_metrics(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        EventHub {
            metrics: Some(metrics),
            ..Self::new(capacity)
        }
    }

    /// Register a subscriber for one project
    pub fn subscribe(
        self: &Arc<Self>,
        project_id: ProjectId,
        actor_id: ActorId,
    ) -> DaemonResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();

        {
            let mut projects = self.projects.write();
            // Checked under the lock so close_all cannot miss this subscriber
            if self.closed.load(Ordering::SeqCst) {
                return Err(WorkflowError::ShuttingDown.into());
            }
            projects
                .entry(project_id)
                .or_default()
                .insert(id, Subscriber { actor_id, tx });
        }

        let mut stats = self.stats.lock();
        stats.total_subscriptions += 1;
        stats.active_subscriptions += 1;
        drop(stats);

        info!(%id, project_id, actor_id, "Subscribed to project events");

        Ok(Subscription {
            id,
            project_id,
            receiver: rx,
            hub: Arc::downgrade(self),
        })
    }

    /// Remove a subscriber. Unknown or already removed handles are a no-op.
    pub fn unsubscribe(&self, project_id: ProjectId, id: Uuid) -> bool {
        let removed = self.remove(project_id, id).is_some();
        if removed {
            info!(%id, project_id, "Unsubscribed from project events");
        }
        removed
    }

    fn remove(&self, project_id: ProjectId, id: Uuid) -> Option<Subscriber> {
        let removed = {
            let mut projects = self.projects.write();
            let subscribers = projects.get_mut(&project_id)?;
            let removed = subscribers.remove(&id);
            if subscribers.is_empty() {
                projects.remove(&project_id);
            }
            removed
        };
        if removed.is_some() {
            let mut stats = self.stats.lock();
            stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
        }
        removed
    }

    /// Deliver an event to every subscriber of a project without blocking.
    ///
    /// A subscriber whose queue is full or closed is torn down; the others
    /// still receive the event. Returns the number of deliveries.
    pub fn publish(&self, project_id: ProjectId, event: HubEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let projects = self.projects.read();
            if let Some(subscribers) = projects.get(&project_id) {
                for (id, subscriber) in subscribers {
                    match subscriber.tx.try_send(event.clone()) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                %id,
                                project_id,
                                actor_id = subscriber.actor_id,
                                "Subscriber queue full, dropping subscriber"
                            );
                            dead.push(*id);
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(%id, project_id, "Subscriber gone, removing");
                            dead.push(*id);
                        }
                    }
                }
            }
        }

        let dropped = dead
            .into_iter()
            .filter(|id| self.remove(project_id, *id).is_some())
            .count();

        let mut stats = self.stats.lock();
        stats.events_published += 1;
        stats.deliveries += delivered as u64;
        stats.subscribers_dropped += dropped as u64;
        *stats
            .events_by_type
            .entry(event.event_type.clone())
            .or_insert(0) += 1;
        drop(stats);

        if let Some(metrics) = &self.metrics {
            metrics.record_event_published();
            for _ in 0..dropped {
                metrics.record_subscriber_dropped();
            }
        }

        debug!(
            project_id,
            event_type = %event.event_type,
            drawing_id = event.drawing_id,
            delivered,
            dropped,
            "Event published"
        );
        delivered
    }

    /// Drop every subscriber and refuse new ones. Open streams end.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let projects = std::mem::take(&mut *self.projects.write());
        let closed: usize = projects.values().map(HashMap::len).sum();

        let mut stats = self.stats.lock();
        stats.active_subscriptions = 0;
        drop(stats);

        info!(closed, "Closed all event subscriptions");
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get current statistics
    pub fn stats(&self) -> EventHubStats {
        self.stats.lock().clone()
    }

    /// Active subscriptions of one project
    pub fn subscriber_count(&self, project_id: ProjectId) -> usize {
        self.projects
            .read()
            .get(&project_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ChangeNotifier for EventHub {
    fn drawing_changed(&self, change: &DrawingChange) {
        self.publish(change.project_id, HubEvent::from(change));
    }
}

/// A registered subscriber's receiving end.
///
/// Dropping it unregisters the subscriber exactly once.
pub struct Subscription {
    id: Uuid,
    project_id: ProjectId,
    receiver: mpsc::Receiver<HubEvent>,
    hub: Weak<EventHub>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Next event; `None` once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.project_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcflow_core::ChangeKind;

    fn event(project_id: ProjectId, drawing_id: DrawingId) -> HubEvent {
        HubEvent {
            id: Uuid::new_v4(),
            event_type: ChangeKind::Claimed.as_str().to_string(),
            project_id,
            drawing_id,
            stage: Stage::Unassigned,
            version: 2,
            actor_id: Some(1),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_project_subscribers_only() {
        let hub = Arc::new(EventHub::new(4));
        let mut first = hub.subscribe(1, 10).unwrap();
        let mut other = hub.subscribe(2, 11).unwrap();

        assert_eq!(hub.publish(1, event(1, 5)), 1);

        let received = first.recv().await.unwrap();
        assert_eq!(received.drawing_id, 5);
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_tears_down_only_slow_subscriber() {
        let hub = Arc::new(EventHub::new(1));
        let mut fast = hub.subscribe(1, 10).unwrap();
        let _slow = hub.subscribe(1, 11).unwrap();

        assert_eq!(hub.publish(1, event(1, 1)), 2);
        fast.recv().await.unwrap();

        // slow never reads; its single slot is still occupied
        assert_eq!(hub.publish(1, event(1, 2)), 1);
        assert_eq!(hub.subscriber_count(1), 1);
        assert_eq!(fast.recv().await.unwrap().drawing_id, 2);

        let stats = hub.stats();
        assert_eq!(stats.subscribers_dropped, 1);
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.deliveries, 3);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_drains_then_ends() {
        let hub = Arc::new(EventHub::new(1));
        let mut slow = hub.subscribe(1, 11).unwrap();

        hub.publish(1, event(1, 1));
        hub.publish(1, event(1, 2));

        assert_eq!(slow.recv().await.unwrap().drawing_id, 1);
        assert!(slow.recv().await.is_none());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = Arc::new(EventHub::new(4));
        let sub = hub.subscribe(1, 10).unwrap();
        let id = sub.id();

        assert!(hub.unsubscribe(1, id));
        assert!(!hub.unsubscribe(1, id));
        assert!(!hub.unsubscribe(99, Uuid::new_v4()));

        // Dropping after an explicit unsubscribe is a no-op too
        drop(sub);
        assert_eq!(hub.stats().active_subscriptions, 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = Arc::new(EventHub::new(4));
        {
            let _sub = hub.subscribe(3, 10).unwrap();
            assert_eq!(hub.subscriber_count(3), 1);
        }
        assert_eq!(hub.subscriber_count(3), 0);
        assert_eq!(hub.stats().total_subscriptions, 1);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams_and_refuses_new() {
        let hub = Arc::new(EventHub::new(4));
        let mut sub = hub.subscribe(1, 10).unwrap();

        assert_eq!(hub.close_all(), 1);
        assert!(sub.recv().await.is_none());
        assert!(hub.subscribe(1, 10).is_err());
        assert_eq!(hub.publish(1, event(1, 1)), 0);
    }

    #[test]
    fn test_publish_without_subscribers_counts_event() {
        let hub = EventHub::new(4);
        assert_eq!(hub.publish(1, event(1, 1)), 0);
        let stats = hub.stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_by_type.get("drawing_claimed"), Some(&1));
    }
}
