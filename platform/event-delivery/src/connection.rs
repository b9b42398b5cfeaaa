//! Broker connection lifecycle.
//!
//! A [`Connection`] is an explicit handle created by the process's
//! composition root and passed into publishers and subscribers. Clones share
//! one session; closing any clone closes the session once, later closes are
//! no-ops.

use async_nats::{jetstream, Client, ConnectOptions};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BoxError, EventError, EventResult};

/// Connection name used by [`connect_with_defaults`]
pub const DEFAULT_CONNECTION_NAME: &str = "platform-service";

/// Lifecycle hooks for a broker session.
///
/// Hooks run on the client's event task, never on the thread that called
/// into the publisher or subscriber. Keep them short.
pub trait ConnectionObserver: Send + Sync {
    /// The session lost its server connection and is trying to reconnect
    fn on_disconnect(&self, _connection_name: &str) {}

    /// The session is connected again after a disconnect
    fn on_reconnect(&self, _connection_name: &str) {}

    /// The owner closed the session
    fn on_closed(&self, _connection_name: &str) {}
}

/// Connection settings
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Broker URL, e.g. `nats://localhost:4222`
    pub url: String,
    /// Name reported to the server for this client
    pub connection_name: String,
    /// Reconnect attempts before giving up; `None` retries forever
    pub max_reconnects: Option<usize>,
    /// Delay between reconnect attempts
    pub reconnect_wait: Duration,
    pub observer: Option<Arc<dyn ConnectionObserver>>,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
            max_reconnects: Some(10),
            reconnect_wait: Duration::from_secs(2),
            observer: None,
        }
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("connection_name", &self.connection_name)
            .field("max_reconnects", &self.max_reconnects)
            .field("reconnect_wait", &self.reconnect_wait)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Shared handle to a live broker session
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    client: Client,
    name: String,
    closed: AtomicBool,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

impl Connection {
    /// Wrap an already-connected client (no lifecycle hooks installed)
    pub fn from_client(client: Client, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                client,
                name: name.into(),
                closed: AtomicBool::new(false),
                observer: None,
            }),
        }
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// JetStream context over this session
    pub fn jetstream(&self) -> jetstream::Context {
        jetstream::new(self.inner.client.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Drain then close the session. Only the first successful call does any
    /// work; a failed drain leaves the session open so close can be retried.
    pub async fn close(&self) -> EventResult<()> {
        let closed =
            close_once(&self.inner.closed, &self.inner.name, self.inner.client.drain()).await?;

        if closed {
            if let Some(observer) = &self.inner.observer {
                observer.on_closed(&self.inner.name);
            }
        }

        Ok(())
    }
}

/// Run `drain` unless `closed` is already set. Returns whether this call
/// closed the session.
async fn close_once<F, E>(closed: &AtomicBool, name: &str, drain: F) -> EventResult<bool>
where
    F: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    if closed.swap(true, Ordering::SeqCst) {
        debug!(connection = %name, "NATS connection already closed");
        return Ok(false);
    }

    if let Err(e) = drain.await {
        closed.store(false, Ordering::SeqCst);
        let e: BoxError = e.into();
        warn!(connection = %name, error = %e, "Failed to drain NATS connection");
        return Err(EventError::internal_with("failed to drain NATS connection", e));
    }

    info!(connection = %name, "NATS connection drained and closed");
    Ok(true)
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Tracks whether a disconnect was seen so the next `Connected` event is
/// reported as a reconnect rather than the initial connect.
#[derive(Default)]
struct LifecycleState {
    disconnected: AtomicBool,
}

fn dispatch_lifecycle_event(
    event: &async_nats::Event,
    name: &str,
    state: &LifecycleState,
    observer: Option<&dyn ConnectionObserver>,
) {
    match event {
        async_nats::Event::Disconnected => {
            warn!(connection = %name, "NATS disconnected");
            state.disconnected.store(true, Ordering::SeqCst);
            if let Some(observer) = observer {
                observer.on_disconnect(name);
            }
        }
        async_nats::Event::Connected => {
            if state.disconnected.swap(false, Ordering::SeqCst) {
                info!(connection = %name, "NATS reconnected");
                if let Some(observer) = observer {
                    observer.on_reconnect(name);
                }
            } else {
                debug!(connection = %name, "NATS connected");
            }
        }
        other => {
            warn!(connection = %name, event = %other, "NATS connection event");
        }
    }
}

/// Open a session to the broker.
///
/// # Errors
/// * `BadRequest` if the URL is empty
/// * `InternalServerError` if the broker cannot be reached
pub async fn connect(config: &ConnectionConfig) -> EventResult<Connection> {
    if config.url.trim().is_empty() {
        return Err(EventError::bad_request("NATS URL is required"));
    }

    let name = config.connection_name.clone();
    let observer = config.observer.clone();
    let state = Arc::new(LifecycleState::default());
    let reconnect_wait = config.reconnect_wait;

    let callback_name = name.clone();
    let callback_observer = observer.clone();
    let options = ConnectOptions::new()
        .name(&name)
        .max_reconnects(config.max_reconnects)
        .reconnect_delay_callback(move |_attempts| reconnect_wait)
        .event_callback(move |event| {
            let name = callback_name.clone();
            let observer = callback_observer.clone();
            let state = state.clone();
            async move {
                dispatch_lifecycle_event(&event, &name, &state, observer.as_deref());
            }
        });

    let client = options.connect(config.url.as_str()).await.map_err(|e| {
        warn!(url = %config.url, error = %e, "Failed to connect to NATS");
        EventError::internal_with("failed to connect to NATS", e)
    })?;

    info!(url = %config.url, connection = %name, "Connected to NATS");

    Ok(Connection {
        inner: Arc::new(ConnectionInner {
            client,
            name,
            closed: AtomicBool::new(false),
            observer,
        }),
    })
}

/// Connect with 10 reconnect attempts, a 2 second wait and the default name
pub async fn connect_with_defaults(url: impl Into<String>) -> EventResult<Connection> {
    connect(&ConnectionConfig::new(url)).await
}

/// Gracefully close a session. `None` and already-closed sessions are a no-op.
pub async fn disconnect(conn: Option<&Connection>) -> EventResult<()> {
    match conn {
        None => Ok(()),
        Some(conn) => conn.close().await,
    }
}
