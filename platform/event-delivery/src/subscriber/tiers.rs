//! Delivery tiers (durable, ephemeral, bare) and the fallback between them.
//!
//! JetStream tiers start at new messages only.

use async_nats::jetstream::{
    self,
    consumer::{push, AckPolicy, DeliverPolicy},
};
use async_nats::Client;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::{process_acknowledged, process_best_effort, Delivery};
use super::{EventHandler, SubscriberConfig};
use crate::error::{EventError, EventResult};

/// Durability level a subscription ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryTier {
    Durable,
    Ephemeral,
    Bare,
}

impl DeliveryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Ephemeral => "ephemeral",
            Self::Bare => "bare",
        }
    }

    /// Whether deliveries on this tier are acked/naked
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, Self::Bare)
    }
}

impl fmt::Display for DeliveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asked to subscribe to
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub subject: String,
    /// Consumer name for the durable tier; `None` skips that tier
    pub durable_name: Option<String>,
    pub config: SubscriberConfig,
}

/// Running subscription: one worker task consuming messages
pub struct SubscriptionHandle {
    tier: DeliveryTier,
    subject: String,
    shutdown: CancellationToken,
    worker: JoinHandle<EventResult<()>>,
}

impl SubscriptionHandle {
    /// Spawn `worker` with a shutdown token that [`drain`](Self::drain) fires
    pub fn spawn<F, Fut>(tier: DeliveryTier, subject: impl Into<String>, worker: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = EventResult<()>> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker(shutdown.clone()));
        Self {
            tier,
            subject: subject.into(),
            shutdown,
            worker,
        }
    }

    pub fn tier(&self) -> DeliveryTier {
        self.tier
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop taking new messages and wait for in-flight handlers to finish
    pub async fn drain(self) -> EventResult<()> {
        self.shutdown.cancel();
        match self.worker.await {
            Ok(result) => result,
            Err(e) => Err(EventError::internal_with(
                format!("subscription worker for {} failed", self.subject),
                e,
            )),
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("tier", &self.tier)
            .field("subject", &self.subject)
            .finish()
    }
}

/// One way of turning a subscription request into a running subscription
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn tier(&self) -> DeliveryTier;

    async fn start(
        &self,
        request: &SubscriptionRequest,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<SubscriptionHandle>;
}

/// First strategy that starts wins. Durable is skipped without a durable name.
pub async fn subscribe_with_fallback(
    strategies: &[Arc<dyn DeliveryStrategy>],
    request: &SubscriptionRequest,
    handler: Arc<dyn EventHandler>,
) -> EventResult<SubscriptionHandle> {
    let mut failures = Vec::new();

    for strategy in strategies {
        let tier = strategy.tier();
        if tier == DeliveryTier::Durable && request.durable_name.is_none() {
            continue;
        }

        match strategy.start(request, handler.clone()).await {
            Ok(handle) => {
                if failures.is_empty() {
                    info!(subject = %request.subject, tier = %tier, "Subscribed");
                } else {
                    warn!(
                        subject = %request.subject,
                        tier = %tier,
                        skipped = ?failures,
                        "Subscribed with degraded delivery guarantees"
                    );
                }
                return Ok(handle);
            }
            Err(e) => {
                warn!(
                    subject = %request.subject,
                    tier = %tier,
                    error = %e,
                    "Delivery tier unavailable, falling back"
                );
                failures.push(format!("{tier}: {e}"));
            }
        }
    }

    Err(EventError::internal(format!(
        "failed to subscribe to subject {}: {}",
        request.subject,
        failures.join("; ")
    )))
}

/// Consume acknowledged deliveries until shutdown or the stream ends
pub async fn run_acknowledged<M, D, E>(
    messages: M,
    handler: Arc<dyn EventHandler>,
    shutdown: CancellationToken,
    subject: String,
) -> EventResult<()>
where
    M: Stream<Item = Result<D, E>> + Send,
    D: Delivery + 'static,
    E: fmt::Display,
{
    tokio::pin!(messages);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = messages.next() => match next {
                Some(Ok(delivery)) => {
                    let handler = handler.clone();
                    in_flight.spawn(async move {
                        process_acknowledged(&delivery, handler.as_ref()).await
                    });
                }
                Some(Err(e)) => {
                    warn!(subject = %subject, error = %e, "Error receiving message");
                }
                None => {
                    debug!(subject = %subject, "Message stream ended");
                    break;
                }
            },
            Some(joined) = in_flight.join_next() => log_join(&subject, joined),
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(&subject, joined);
    }

    debug!(subject = %subject, "Subscription drained");
    Ok(())
}

fn log_join<T: fmt::Debug>(subject: &str, joined: Result<T, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => debug!(subject = %subject, outcome = ?outcome, "Delivery finished"),
        Err(e) => warn!(subject = %subject, error = %e, "Delivery task failed"),
    }
}

/// Push consumer settings shared by the durable and ephemeral tiers
fn push_consumer_config(
    client: &Client,
    request: &SubscriptionRequest,
    durable_name: Option<String>,
) -> push::Config {
    push::Config {
        durable_name,
        deliver_subject: client.new_inbox(),
        deliver_policy: DeliverPolicy::New,
        ack_policy: AckPolicy::Explicit,
        max_deliver: request.config.max_deliver,
        ack_wait: request.config.ack_wait,
        filter_subject: request.subject.clone(),
        ..Default::default()
    }
}

async fn start_push_consumer(
    js: &jetstream::Context,
    client: &Client,
    request: &SubscriptionRequest,
    durable_name: Option<&str>,
    tier: DeliveryTier,
    handler: Arc<dyn EventHandler>,
) -> EventResult<SubscriptionHandle> {
    let subject = request.subject.clone();

    let stream_name = js.stream_by_subject(subject.clone()).await.map_err(|e| {
        EventError::internal_with(format!("no stream captures subject {subject}"), e)
    })?;

    let stream = js.get_stream(&stream_name).await.map_err(|e| {
        EventError::internal_with(format!("failed to look up stream {stream_name}"), e)
    })?;

    let config = push_consumer_config(client, request, durable_name.map(str::to_string));
    let consumer = match durable_name {
        Some(name) => stream.get_or_create_consumer(name, config).await.map_err(|e| {
            EventError::internal_with(
                format!("failed to subscribe to subject {subject} with durable {name}"),
                e,
            )
        })?,
        None => stream.create_consumer(config).await.map_err(|e| {
            EventError::internal_with(format!("failed to subscribe to subject {subject}"), e)
        })?,
    };

    let messages = consumer.messages().await.map_err(|e| {
        EventError::internal_with(format!("failed to open message stream for {subject}"), e)
    })?;

    debug!(subject = %subject, stream = %stream_name, tier = %tier, "Push consumer started");

    Ok(SubscriptionHandle::spawn(tier, subject.clone(), move |shutdown| {
        run_acknowledged(messages, handler, shutdown, subject)
    }))
}

/// Tier 1: named JetStream consumer
pub struct DurableStrategy {
    js: jetstream::Context,
    client: Client,
}

impl DurableStrategy {
    pub fn new(js: jetstream::Context, client: Client) -> Self {
        Self { js, client }
    }
}

#[async_trait]
impl DeliveryStrategy for DurableStrategy {
    fn tier(&self) -> DeliveryTier {
        DeliveryTier::Durable
    }

    async fn start(
        &self,
        request: &SubscriptionRequest,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<SubscriptionHandle> {
        let name = request
            .durable_name
            .as_deref()
            .ok_or_else(|| EventError::bad_request("durable name is required"))?;

        start_push_consumer(
            &self.js,
            &self.client,
            request,
            Some(name),
            DeliveryTier::Durable,
            handler,
        )
        .await
    }
}

/// Tier 2: unnamed JetStream consumer
pub struct EphemeralStrategy {
    js: jetstream::Context,
    client: Client,
}

impl EphemeralStrategy {
    pub fn new(js: jetstream::Context, client: Client) -> Self {
        Self { js, client }
    }
}

#[async_trait]
impl DeliveryStrategy for EphemeralStrategy {
    fn tier(&self) -> DeliveryTier {
        DeliveryTier::Ephemeral
    }

    async fn start(
        &self,
        request: &SubscriptionRequest,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<SubscriptionHandle> {
        start_push_consumer(
            &self.js,
            &self.client,
            request,
            None,
            DeliveryTier::Ephemeral,
            handler,
        )
        .await
    }
}

/// Tier 3: core NATS subscription, best effort
pub struct BareStrategy {
    client: Client,
}

impl BareStrategy {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeliveryStrategy for BareStrategy {
    fn tier(&self) -> DeliveryTier {
        DeliveryTier::Bare
    }

    async fn start(
        &self,
        request: &SubscriptionRequest,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult<SubscriptionHandle> {
        let subject = request.subject.clone();
        let subscriber = self.client.subscribe(subject.clone()).await.map_err(|e| {
            EventError::internal_with(format!("failed to subscribe to subject {subject}"), e)
        })?;

        Ok(SubscriptionHandle::spawn(
            DeliveryTier::Bare,
            subject.clone(),
            move |shutdown| run_best_effort(subscriber, handler, shutdown, subject),
        ))
    }
}

async fn run_best_effort(
    mut subscriber: async_nats::Subscriber,
    handler: Arc<dyn EventHandler>,
    shutdown: CancellationToken,
    subject: String,
) -> EventResult<()> {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = subscriber.next() => match next {
                Some(message) => {
                    let handler = handler.clone();
                    in_flight.spawn(async move {
                        process_best_effort(&message.payload, handler.as_ref()).await
                    });
                }
                None => {
                    debug!(subject = %subject, "Subscription closed by server");
                    break;
                }
            },
            Some(joined) = in_flight.join_next() => log_join(&subject, joined),
        }
    }

    // Unsubscribe, then hand whatever is already buffered to the handler
    subscriber.drain().await.map_err(|e| {
        EventError::internal_with(format!("failed to drain subscription {subject}"), e)
    })?;
    while let Some(message) = subscriber.next().await {
        let handler = handler.clone();
        in_flight.spawn(async move { process_best_effort(&message.payload, handler.as_ref()).await });
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(&subject, joined);
    }

    Ok(())
}
