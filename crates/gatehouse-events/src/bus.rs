//! Event bus implementation
//!
//! This module provides the event bus abstraction and the in-process
//! implementation used for publishing and subscribing to catalog changes.

use crate::types::Event;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to publish event
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// Failed to subscribe
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Receiver fell behind and missed events
    #[error("Subscriber lagged, {0} events skipped")]
    Lagged(u64),
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Subscription handle for receiving events.
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Topic pattern
    pub topic: String,
    /// Event receiver
    pub receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event matching this subscription's pattern.
    pub async fn recv(&mut self) -> EventBusResult<Event> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::ChannelClosed,
                broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if topic_matches(&self.topic, &event.topic()) {
                return Ok(event);
            }
        }
    }
}

/// Event handler trait for processing events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: Event) -> EventBusResult<()>;

    /// Get the topics this handler is interested in.
    fn topics(&self) -> Vec<String>;
}

/// Event bus trait for publish/subscribe operations.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    /// Subscribe to a topic pattern.
    ///
    /// Topic patterns support wildcards:
    /// - `*` matches any single segment
    /// - `#` matches zero or more segments
    ///
    /// Examples:
    /// - `gatehouse.resource.*` matches `gatehouse.resource.created`
    /// - `gatehouse.#` matches every gatehouse event
    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription>;

    /// Register an event handler.
    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()>;

    /// Unsubscribe from a topic.
    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()>;

    /// Get event bus stats.
    async fn stats(&self) -> EventBusStats;
}

/// Event bus statistics.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    /// Total events published
    pub events_published: u64,
    /// Total events received from a remote backend
    pub events_received: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
    /// Registered handlers
    pub registered_handlers: usize,
}

/// Check if a topic matches a pattern.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    let topic_parts: Vec<&str> = topic.split('.').collect();
    segments_match(&pattern_parts, &topic_parts)
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    match (pattern.first(), topic.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            // Zero segments, or consume one topic segment and keep the '#'
            segments_match(&pattern[1..], topic)
                || (!topic.is_empty() && segments_match(pattern, &topic[1..]))
        }
        (Some(&"*"), Some(_)) => segments_match(&pattern[1..], &topic[1..]),
        (Some(p), Some(t)) if p == t => segments_match(&pattern[1..], &topic[1..]),
        _ => false,
    }
}

/// In-memory event bus implementation.
///
/// This is suitable for single-process deployments and testing.
/// For multiple instances, use the Redis backend.
pub struct MemoryEventBus {
    /// Shared channel; subscriptions filter by pattern on receive
    sender: broadcast::Sender<Event>,
    /// Registered handlers
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    /// Statistics
    stats: Arc<RwLock<EventBusStats>>,
    /// Channel capacity
    channel_capacity: usize,
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl MemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create with custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            channel_capacity: capacity,
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        let topic = event.topic();

        {
            let mut stats = self.stats.write().await;
            stats.events_published += 1;
        }

        // No receivers is not an error
        let _ = self.sender.send(event.clone());

        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            if handler
                .topics()
                .iter()
                .any(|pattern| topic_matches(pattern, &topic))
            {
                let handler = handler.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(event).await {
                        tracing::error!(error = %e, "Event handler failed");
                    }
                });
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription> {
        let receiver = self.sender.subscribe();

        {
            let mut stats = self.stats.write().await;
            stats.active_subscriptions += 1;
        }

        Ok(Subscription {
            id: uuid::Uuid::now_v7().to_string(),
            topic: topic.to_string(),
            receiver,
        })
    }

    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()> {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);

        {
            let mut stats = self.stats.write().await;
            stats.registered_handlers += 1;
        }

        Ok(())
    }

    async fn unsubscribe(&self, _subscription_id: &str) -> EventBusResult<()> {
        let mut stats = self.stats.write().await;
        if stats.active_subscriptions > 0 {
            stats.active_subscriptions -= 1;
        }
        Ok(())
    }

    async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CatalogEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_event_bus_publish_subscribe() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe("gatehouse.role.*").await.unwrap();

        let event = CatalogEvent::RoleDeleted {
            name: "auditor".into(),
        }
        .to_event("instance-a");
        bus.publish(event).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("event delivered")
            .unwrap();
        assert_eq!(received.event_type, "role.deleted");
    }

    #[tokio::test]
    async fn test_subscription_filters_other_topics() {
        let bus = MemoryEventBus::new();
        let mut sub = bus.subscribe("gatehouse.resource.#").await.unwrap();

        bus.publish(CatalogEvent::RoleCreated { name: "x".into() }.to_event("a"))
            .await
            .unwrap();
        bus.publish(
            CatalogEvent::ResourceUpdated {
                resource_id: uuid::Uuid::now_v7(),
                name: "documents".into(),
                regenerated: true,
            }
            .to_event("a"),
        )
        .await
        .unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("event delivered")
            .unwrap();
        assert_eq!(received.event_type, "resource.updated");
    }

    #[test]
    fn test_topic_matching() {
        // Exact match
        assert!(topic_matches("gatehouse.role.created", "gatehouse.role.created"));

        // Single wildcard
        assert!(topic_matches("gatehouse.role.*", "gatehouse.role.created"));
        assert!(topic_matches("gatehouse.*.created", "gatehouse.role.created"));
        assert!(topic_matches("*.role.created", "gatehouse.role.created"));

        // Multi-segment wildcard
        assert!(topic_matches("gatehouse.#", "gatehouse.role.created"));
        assert!(topic_matches("#", "gatehouse.role.created"));
        assert!(topic_matches("gatehouse.#.created", "gatehouse.role.created"));
        assert!(topic_matches("gatehouse.role.#", "gatehouse.role"));

        // Non-matches
        assert!(!topic_matches("gatehouse.role.updated", "gatehouse.role.created"));
        assert!(!topic_matches("gatehouse.resource.*", "gatehouse.role.created"));
        assert!(!topic_matches("gatehouse.*", "gatehouse.role.created"));
    }

    struct CountingHandler {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: Event) -> EventBusResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn topics(&self) -> Vec<String> {
            vec!["gatehouse.permission.#".to_string()]
        }
    }

    #[tokio::test]
    async fn test_handlers_receive_matching_events() {
        let bus = MemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.register_handler(Arc::new(CountingHandler { seen: seen.clone() }))
            .await
            .unwrap();

        bus.publish(
            CatalogEvent::PermissionCreated {
                permission_id: uuid::Uuid::now_v7(),
                name: "a:b".into(),
            }
            .to_event("a"),
        )
        .await
        .unwrap();
        bus.publish(CatalogEvent::RoleCreated { name: "x".into() }.to_event("a"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = MemoryEventBus::new();

        let stats = bus.stats().await;
        assert_eq!(stats.events_published, 0);
        assert_eq!(stats.active_subscriptions, 0);

        let sub = bus.subscribe("gatehouse.#").await.unwrap();
        assert_eq!(bus.stats().await.active_subscriptions, 1);

        bus.publish(CatalogEvent::RoleCreated { name: "x".into() }.to_event("a"))
            .await
            .unwrap();
        assert_eq!(bus.stats().await.events_published, 1);

        bus.unsubscribe(&sub.id).await.unwrap();
        assert_eq!(bus.stats().await.active_subscriptions, 0);
    }
}
