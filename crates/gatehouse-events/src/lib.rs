//! # Gatehouse Events
//!
//! Catalog change notifications for the gatehouse authorization engine.
//!
//! ## Overview
//!
//! The gatehouse-events crate handles:
//! - **Event Types**: The `Event` envelope and typed `CatalogEvent`s
//! - **Event Bus**: Publish/subscribe messaging
//! - **Event Handlers**: Async event processing
//!
//! ## Features
//!
//! - `memory` (default): In-memory event bus for single-process deployments
//! - `redis`: Redis-backed event bus so several engine instances can keep
//!   their catalog caches in step
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gatehouse_events::{CatalogEvent, EventBus, MemoryEventBus};
//!
//! async fn example() {
//!     let bus = MemoryEventBus::new();
//!     let mut sub = bus.subscribe("gatehouse.resource.*").await.unwrap();
//!
//!     let event = CatalogEvent::RoleCreated { name: "auditor".into() };
//!     bus.publish(event.to_event("instance-a")).await.unwrap();
//!
//!     while let Ok(event) = sub.recv().await {
//!         println!("Received: {}", event.event_type);
//!     }
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Topics are structured as `gatehouse.{category}.{verb}`:
//! - `gatehouse.resource.created` - Specific event
//! - `gatehouse.permission.*` - All permission events
//! - `gatehouse.#` - All events
//!
//! Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments

pub mod bus;
pub mod types;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export main types
pub use bus::{
    topic_matches, EventBus, EventBusError, EventBusResult, EventBusStats, EventHandler,
    MemoryEventBus, Subscription,
};
pub use types::{CatalogEvent, Event, EventCategory, TOPIC_PREFIX};

#[cfg(feature = "redis")]
pub use redis::RedisEventBus;
