//! Event publishing over JetStream.
//!
//! Every write carries the event id as its message id, so a retried write
//! that already landed is dropped by the stream's duplicate window.

use async_nats::jetstream::{self, context::Publish};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{disconnect, Connection};
use crate::error::{BoxError, EventError, EventResult};
use crate::event::Event;
use crate::retry::{retry_publish, RetryPolicy};
use crate::schema::SchemaRegistry;

/// Broker write primitives used by [`NatsPublisher`]
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Write and wait for the broker's durability ack
    async fn write(&self, subject: &str, msg_id: &str, payload: Vec<u8>) -> Result<(), BoxError>;

    /// Hand the write to the client without waiting for the ack
    async fn submit(&self, subject: &str, msg_id: &str, payload: Vec<u8>) -> Result<(), BoxError>;
}

#[async_trait]
impl PublishSink for jetstream::Context {
    async fn write(&self, subject: &str, msg_id: &str, payload: Vec<u8>) -> Result<(), BoxError> {
        let publish = Publish::build().payload(payload.into()).message_id(msg_id);
        let ack = self.send_publish(subject.to_string(), publish).await?;
        ack.await?;
        Ok(())
    }

    async fn submit(&self, subject: &str, msg_id: &str, payload: Vec<u8>) -> Result<(), BoxError> {
        let publish = Publish::build().payload(payload.into()).message_id(msg_id);
        // The ack future is dropped; the message is already queued on the client.
        let _ack = self.send_publish(subject.to_string(), publish).await?;
        Ok(())
    }
}

/// Publishing half of the event bus
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish and wait for the broker ack, retrying on failure.
    ///
    /// `cancel` is only observed while waiting between attempts.
    async fn publish(
        &self,
        cancel: &CancellationToken,
        subject: &str,
        event: &Event,
    ) -> EventResult<()>;

    /// Submit once without waiting for the broker ack
    async fn publish_async(&self, subject: &str, event: &Event) -> EventResult<()>;

    /// Gracefully close the underlying connection
    async fn close(&self) -> EventResult<()>;
}

/// JetStream publisher
///
/// # Example
/// ```rust,no_run
/// use chrono::Utc;
/// use event_delivery::{connect_with_defaults, Event, EventData, EventPublisher, NatsPublisher};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = connect_with_defaults("nats://localhost:4222").await?;
/// let publisher = NatsPublisher::new(&conn);
///
/// let event = Event::new("catalog.product.created", "catalog-service", "org-1", Utc::now(), EventData::new());
/// publisher
///     .publish(&CancellationToken::new(), "catalog.product.created", &event)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct NatsPublisher<S = jetstream::Context> {
    sink: S,
    connection: Option<Connection>,
    retry: RetryPolicy,
    schemas: Option<Arc<SchemaRegistry>>,
}

impl NatsPublisher {
    /// Publisher over a shared connection. [`close`](EventPublisher::close)
    /// closes that connection for every holder.
    pub fn new(connection: &Connection) -> Self {
        Self {
            sink: connection.jetstream(),
            connection: Some(connection.clone()),
            retry: RetryPolicy::default(),
            schemas: None,
        }
    }
}

impl<S: PublishSink> NatsPublisher<S> {
    /// Publisher over an arbitrary sink, with no connection to close
    pub fn with_sink(sink: S) -> Self {
        Self {
            sink,
            connection: None,
            retry: RetryPolicy::default(),
            schemas: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check payloads against per-type schemas before publishing
    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    fn prepare(&self, subject: &str, event: &Event) -> EventResult<Vec<u8>> {
        if subject.is_empty() {
            return Err(EventError::bad_request("subject is required"));
        }

        match &self.schemas {
            Some(schemas) => schemas.validate(event)?,
            None => event.validate()?,
        }

        event.to_json()
    }
}

#[async_trait]
impl<S: PublishSink> EventPublisher for NatsPublisher<S> {
    async fn publish(
        &self,
        cancel: &CancellationToken,
        subject: &str,
        event: &Event,
    ) -> EventResult<()> {
        let payload = self.prepare(subject, event)?;

        retry_publish(cancel, &self.retry, subject, || {
            self.sink.write(subject, &event.id, payload.clone())
        })
        .await?;

        debug!(
            subject = %subject,
            event_id = %event.id,
            event_type = %event.event_type,
            "Published event"
        );
        Ok(())
    }

    async fn publish_async(&self, subject: &str, event: &Event) -> EventResult<()> {
        let payload = self.prepare(subject, event)?;

        self.sink
            .submit(subject, &event.id, payload)
            .await
            .map_err(|e| EventError::internal_with("failed to publish event async", e))?;

        debug!(
            subject = %subject,
            event_id = %event.id,
            event_type = %event.event_type,
            "Submitted event"
        );
        Ok(())
    }

    async fn close(&self) -> EventResult<()> {
        disconnect(self.connection.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every write; the first `failures` calls fail
    #[derive(Default)]
    struct FakeSink {
        failures: Mutex<usize>,
        writes: Mutex<Vec<(String, String)>>,
        submits: Mutex<Vec<(String, String)>>,
    }

    impl FakeSink {
        fn failing(failures: usize) -> Self {
            Self {
                failures: Mutex::new(failures),
                ..Default::default()
            }
        }

        fn next_result(&self) -> Result<(), BoxError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err("no responders available for request".into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PublishSink for FakeSink {
        async fn write(&self, subject: &str, msg_id: &str, payload: Vec<u8>) -> Result<(), BoxError> {
            Event::from_json(&payload).expect("payload should be a valid envelope");
            self.writes
                .lock()
                .unwrap()
                .push((subject.to_string(), msg_id.to_string()));
            self.next_result()
        }

        async fn submit(&self, subject: &str, msg_id: &str, _payload: Vec<u8>) -> Result<(), BoxError> {
            self.submits
                .lock()
                .unwrap()
                .push((subject.to_string(), msg_id.to_string()));
            self.next_result()
        }
    }

    fn product_created() -> Event {
        let mut data = EventData::new();
        data.insert("product_id".to_string(), json!("prod-1"));
        Event::new("catalog.product.created", "catalog-service", "org-1", Utc::now(), data)
    }

    #[tokio::test]
    async fn test_publish_success_writes_once() {
        let publisher = NatsPublisher::with_sink(FakeSink::default());
        let event = product_created();

        publisher
            .publish(&CancellationToken::new(), "catalog.product.created", &event)
            .await
            .unwrap();

        let writes = publisher.sink.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![("catalog.product.created".to_string(), event.id.clone())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_retries_with_same_message_id() {
        let publisher = NatsPublisher::with_sink(FakeSink::failing(1));
        let event = product_created();

        publisher
            .publish(&CancellationToken::new(), "catalog.product.created", &event)
            .await
            .unwrap();

        let writes = publisher.sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|(_, id)| *id == event.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_exhausts_three_attempts() {
        let publisher = NatsPublisher::with_sink(FakeSink::failing(usize::MAX));

        let err = publisher
            .publish(&CancellationToken::new(), "catalog.product.created", &product_created())
            .await
            .unwrap_err();

        assert!(err.is_internal());
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(publisher.sink.writes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_event_never_reaches_broker() {
        let publisher = NatsPublisher::with_sink(FakeSink::default());
        let mut event = product_created();
        event.organization_id.clear();

        let err = publisher
            .publish(&CancellationToken::new(), "catalog.product.created", &event)
            .await
            .unwrap_err();
        assert!(err.is_bad_request());

        let err = publisher
            .publish_async("catalog.product.created", &event)
            .await
            .unwrap_err();
        assert!(err.is_bad_request());

        assert!(publisher.sink.writes.lock().unwrap().is_empty());
        assert!(publisher.sink.submits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_subject_is_bad_request() {
        let publisher = NatsPublisher::with_sink(FakeSink::default());
        let err = publisher
            .publish(&CancellationToken::new(), "", &product_created())
            .await
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[tokio::test]
    async fn test_schema_rejection_never_reaches_broker() {
        let mut schemas = SchemaRegistry::new();
        schemas
            .register(
                "catalog.product.created",
                &json!({"type": "object", "required": ["sku"]}),
            )
            .unwrap();
        let publisher =
            NatsPublisher::with_sink(FakeSink::default()).with_schemas(Arc::new(schemas));

        let err = publisher
            .publish(&CancellationToken::new(), "catalog.product.created", &product_created())
            .await
            .unwrap_err();

        assert!(err.is_bad_request());
        assert!(publisher.sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_async_submits_once_without_retry() {
        let publisher = NatsPublisher::with_sink(FakeSink::failing(1));
        let event = product_created();

        let err = publisher
            .publish_async("catalog.product.created", &event)
            .await
            .unwrap_err();
        assert!(err.is_internal());
        assert_eq!(publisher.sink.submits.lock().unwrap().len(), 1);

        publisher
            .publish_async("catalog.product.created", &event)
            .await
            .unwrap();
        assert_eq!(publisher.sink.submits.lock().unwrap().len(), 2);
        assert!(publisher.sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let publisher = NatsPublisher::with_sink(FakeSink::default());
        assert!(publisher.close().await.is_ok());
        assert!(publisher.close().await.is_ok());
    }
}
