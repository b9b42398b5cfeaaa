//! Per-message handling.
//!
//! Acknowledged tiers (durable, ephemeral) send exactly one signal per
//! delivery: ack when the handler succeeds, nak when decoding or the handler
//! fails. A nak makes the broker redeliver until `max_deliver` is reached.
//!
//! The bare tier has nothing to signal. Decode and handler failures drop the
//! message.

use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::EventHandler;
use crate::error::BoxError;
use crate::event::Event;

/// A delivered message that can be acknowledged
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    async fn ack(&self) -> Result<(), BoxError>;

    async fn nak(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl Delivery for jetstream::Message {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<(), BoxError> {
        jetstream::Message::ack(self).await
    }

    async fn nak(&self) -> Result<(), BoxError> {
        self.ack_with(AckKind::Nak(None)).await
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler succeeded and the message was acked
    Acked,
    /// Payload could not be decoded; nak sent
    RejectedMalformed,
    /// Handler returned an error; nak sent
    HandlerFailed,
    /// Bare tier: handler succeeded
    Handled,
    /// Bare tier: decode or handler failure, message lost
    Dropped,
}

/// Decode, run the handler, then ack or nak.
pub async fn process_acknowledged<D>(delivery: &D, handler: &dyn EventHandler) -> DeliveryOutcome
where
    D: Delivery + ?Sized,
{
    let event = match Event::from_json(delivery.payload()) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Failed to decode event, sending nak");
            signal_nak(delivery).await;
            return DeliveryOutcome::RejectedMalformed;
        }
    };

    let event_id = event.id.clone();
    let event_type = event.event_type.clone();

    match handler.handle(event).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                warn!(event_id = %event_id, error = %e, "Failed to ack message");
            }
            debug!(event_id = %event_id, event_type = %event_type, "Event acked");
            DeliveryOutcome::Acked
        }
        Err(e) => {
            debug!(
                event_id = %event_id,
                event_type = %event_type,
                error = %e,
                "Handler failed, sending nak"
            );
            signal_nak(delivery).await;
            DeliveryOutcome::HandlerFailed
        }
    }
}

async fn signal_nak<D: Delivery + ?Sized>(delivery: &D) {
    if let Err(e) = delivery.nak().await {
        warn!(error = %e, "Failed to nak message");
    }
}

/// Bare-tier handling: run the handler, swallow every failure.
pub async fn process_best_effort(payload: &[u8], handler: &dyn EventHandler) -> DeliveryOutcome {
    let event = match Event::from_json(payload) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Dropping undecodable message on bare subscription");
            return DeliveryOutcome::Dropped;
        }
    };

    let event_id = event.id.clone();
    match handler.handle(event).await {
        Ok(()) => DeliveryOutcome::Handled,
        Err(e) => {
            debug!(event_id = %event_id, error = %e, "Dropping message after handler error on bare subscription");
            DeliveryOutcome::Dropped
        }
    }
}
