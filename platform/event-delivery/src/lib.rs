//! # Event Delivery
//!
//! Asynchronous event messaging between platform services over NATS
//! JetStream.
//!
//! ## Components
//!
//! - **Event**: the common envelope every message carries (id, type, source,
//!   organization, timestamp, schema version, payload)
//! - **Connection**: one shared session per process, with bounded reconnect
//!   and lifecycle logging
//! - **NatsPublisher**: acknowledged publish with bounded, cancellable retry,
//!   plus a fire-and-forget mode
//! - **NatsSubscriber**: subscriptions that degrade from a durable consumer
//!   to an ephemeral one to a bare subscription, whichever the broker allows
//! - **StreamAdmin**: stream provisioning and the default per-context topology
//!
//! Delivery is at-least-once on the acknowledged tiers. Handlers must be
//! idempotent: a redelivered event carries the same `id`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use event_delivery::{
//!     connect_with_defaults, subjects, Event, EventData, EventPublisher, EventSubscriber,
//!     HandlerError, NatsPublisher, NatsSubscriber,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect_with_defaults("nats://localhost:4222").await?;
//!
//! let subscriber = NatsSubscriber::new(&conn);
//! subscriber
//!     .subscribe_durable(
//!         subjects::CATALOG_ALL,
//!         subjects::consumers::DDMRP_SERVICE,
//!         Arc::new(|event: Event| async move {
//!             tracing::info!(event_type = %event.event_type, "Received");
//!             Ok::<(), HandlerError>(())
//!         }),
//!     )
//!     .await?;
//!
//! let publisher = NatsPublisher::new(&conn);
//! let event = Event::new(
//!     subjects::PRODUCT_CREATED,
//!     "catalog-service",
//!     "org-1",
//!     Utc::now(),
//!     EventData::new(),
//! );
//! publisher
//!     .publish(&CancellationToken::new(), subjects::PRODUCT_CREATED, &event)
//!     .await?;
//!
//! subscriber.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod publisher;
pub mod retry;
pub mod schema;
pub mod streams;
pub mod subjects;
pub mod subscriber;

pub use config::EventsConfig;
pub use connection::{
    connect, connect_with_defaults, disconnect, Connection, ConnectionConfig, ConnectionObserver,
};
pub use error::{BoxError, EventError, EventResult};
pub use event::{Event, EventData};
pub use publisher::{EventPublisher, NatsPublisher, PublishSink};
pub use retry::{retry_publish, RetryPolicy};
pub use schema::SchemaRegistry;
pub use streams::{default_streams, Provisioned, StreamAdmin, StreamBackend, StreamConfig, StreamInfo};
pub use subscriber::{
    DeliveryTier, EventHandler, EventSubscriber, HandlerError, NatsSubscriber, SubscriberConfig,
};
