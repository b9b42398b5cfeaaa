//! # Event subscription
//!
//! A subscription is started on the best delivery tier the broker offers
//! (durable, then ephemeral, then bare, see [`tiers`]) and runs on its own
//! task until [`EventSubscriber::close`] drains it.
//!
//! Before subscribing, the stream that should capture the subject is
//! provisioned if missing. Provisioning is best effort: when it fails the
//! subscription still proceeds and may end up on the bare tier.

pub mod delivery;
pub mod tiers;

use async_nats::jetstream;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection::{disconnect, Connection};
use crate::error::{BoxError, EventError, EventResult};
use crate::event::Event;
use crate::streams::{StreamAdmin, StreamBackend, StreamConfig};
use crate::subjects::stream_name_from_subject;

pub use delivery::{Delivery, DeliveryOutcome};
pub use tiers::{
    subscribe_with_fallback, BareStrategy, DeliveryStrategy, DeliveryTier, DurableStrategy,
    EphemeralStrategy, SubscriptionHandle, SubscriptionRequest,
};

/// Error a handler returns to have the delivery redelivered
pub type HandlerError = BoxError;

/// Application callback invoked once per decoded event.
///
/// On acknowledged tiers `Ok` acks the message and `Err` naks it. Handlers
/// may run concurrently for one subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self)(event).await
    }
}

/// Redelivery settings for acknowledged tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Delivery attempts before the broker gives up on a message
    pub max_deliver: i64,
    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
        }
    }
}

/// Subscribing half of the event bus
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe without a named consumer. Never uses the durable tier.
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<DeliveryTier>;

    /// Subscribe with a named consumer and default redelivery settings
    async fn subscribe_durable(
        &self,
        subject: &str,
        durable_name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<DeliveryTier> {
        self.subscribe_durable_with_config(
            subject,
            durable_name,
            SubscriberConfig::default(),
            handler,
        )
        .await
    }

    async fn subscribe_durable_with_config(
        &self,
        subject: &str,
        durable_name: &str,
        config: SubscriberConfig,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<DeliveryTier>;

    /// Drain every subscription, then close the connection
    async fn close(&self) -> EventResult<()>;
}

/// JetStream subscriber with tier fallback
///
/// # Example
/// ```rust,no_run
/// use event_delivery::{connect_with_defaults, Event, EventSubscriber, HandlerError, NatsSubscriber};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = connect_with_defaults("nats://localhost:4222").await?;
/// let subscriber = NatsSubscriber::new(&conn);
///
/// let tier = subscriber
///     .subscribe_durable(
///         "catalog.>",
///         "ddmrp-catalog-consumer",
///         Arc::new(|event: Event| async move {
///             println!("received {}", event.event_type);
///             Ok::<(), HandlerError>(())
///         }),
///     )
///     .await?;
/// println!("subscribed on the {tier} tier");
/// # Ok(())
/// # }
/// ```
pub struct NatsSubscriber<B = jetstream::Context> {
    connection: Option<Connection>,
    streams: StreamAdmin<B>,
    strategies: Vec<Arc<dyn DeliveryStrategy>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

impl NatsSubscriber {
    /// Subscriber over a shared connection. [`close`](EventSubscriber::close)
    /// closes that connection for every holder.
    pub fn new(connection: &Connection) -> Self {
        let js = connection.jetstream();
        let client = connection.client().clone();

        let strategies: Vec<Arc<dyn DeliveryStrategy>> = vec![
            Arc::new(DurableStrategy::new(js.clone(), client.clone())),
            Arc::new(EphemeralStrategy::new(js.clone(), client.clone())),
            Arc::new(BareStrategy::new(client)),
        ];

        Self {
            connection: Some(connection.clone()),
            streams: StreamAdmin::new(js),
            strategies,
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

impl<B: StreamBackend> NatsSubscriber<B> {
    /// Subscriber over explicit parts, with no connection to close
    pub fn with_parts(streams: StreamAdmin<B>, strategies: Vec<Arc<dyn DeliveryStrategy>>) -> Self {
        Self {
            connection: None,
            streams,
            strategies,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Number of subscriptions currently running
    pub fn active_subscriptions(&self) -> usize {
        self.lock_subscriptions().len()
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<SubscriptionHandle>> {
        // A poisoned list still holds valid handles
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make sure some stream captures `subject`. Failures are logged only.
    async fn ensure_backing_stream(&self, subject: &str) {
        let config = StreamConfig::age_bounded(
            stream_name_from_subject(subject),
            vec![subject.to_string()],
        );

        match self.streams.ensure_stream(&config).await {
            Ok(outcome) => {
                debug!(subject = %subject, stream = %config.name, outcome = ?outcome, "Backing stream ready")
            }
            Err(e) => warn!(
                subject = %subject,
                stream = %config.name,
                error = %e,
                "Failed to provision backing stream, continuing"
            ),
        }
    }

    async fn start(
        &self,
        request: SubscriptionRequest,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<DeliveryTier> {
        if request.subject.is_empty() {
            return Err(EventError::bad_request("subject is required"));
        }

        self.ensure_backing_stream(&request.subject).await;

        let handle = subscribe_with_fallback(&self.strategies, &request, handler).await?;
        let tier = handle.tier();
        self.lock_subscriptions().push(handle);
        Ok(tier)
    }
}

#[async_trait]
impl<B: StreamBackend> EventSubscriber for NatsSubscriber<B> {
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<DeliveryTier> {
        let request = SubscriptionRequest {
            subject: subject.to_string(),
            durable_name: None,
            config: SubscriberConfig::default(),
        };
        self.start(request, handler).await
    }

    async fn subscribe_durable_with_config(
        &self,
        subject: &str,
        durable_name: &str,
        config: SubscriberConfig,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<DeliveryTier> {
        if durable_name.is_empty() {
            return Err(EventError::bad_request("durable name is required"));
        }

        let request = SubscriptionRequest {
            subject: subject.to_string(),
            durable_name: Some(durable_name.to_string()),
            config,
        };
        self.start(request, handler).await
    }

    async fn close(&self) -> EventResult<()> {
        let handles = std::mem::take(&mut *self.lock_subscriptions());
        let mut failures = Vec::new();

        for handle in handles {
            let subject = handle.subject().to_string();
            if let Err(e) = handle.drain().await {
                warn!(subject = %subject, error = %e, "Failed to drain subscription");
                failures.push(format!("{subject}: {e}"));
            }
        }

        if let Err(e) = disconnect(self.connection.as_ref()).await {
            failures.push(e.to_string());
        }

        if failures.is_empty() {
            info!("Subscriber closed");
            Ok(())
        } else {
            Err(EventError::internal(format!(
                "failed to close subscriber: {}",
                failures.join("; ")
            )))
        }
    }
}
