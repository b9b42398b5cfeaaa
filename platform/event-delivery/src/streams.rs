//! Stream administration and the default per-context topology.

use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BoxError, EventError, EventResult};

/// Default retention: 7 days
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Default size cap: 1 GiB
pub const DEFAULT_MAX_BYTES: i64 = 1024 * 1024 * 1024;
/// Window in which a repeated message id is dropped as a duplicate
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(2 * 60);
/// No size/count limit
pub const UNLIMITED: i64 = -1;

/// Declarative definition of a durable log
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub name: String,
    /// Subject patterns captured by the stream
    pub subjects: Vec<String>,
    pub max_age: Duration,
    /// Size cap in bytes, [`UNLIMITED`] for none
    pub max_bytes: i64,
    pub replicas: usize,
}

impl StreamConfig {
    /// Config with the default retention (7 days, 1 GiB, single replica)
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            max_age: DEFAULT_MAX_AGE,
            max_bytes: DEFAULT_MAX_BYTES,
            replicas: 1,
        }
    }

    /// Age-bounded stream with no size cap, used when a subscriber
    /// provisions its own backing stream
    pub fn age_bounded(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            max_bytes: UNLIMITED,
            ..Self::new(name, subjects)
        }
    }

    /// Broker-side config: file storage, limits retention, discard old
    pub fn to_nats_config(&self) -> stream::Config {
        stream::Config {
            name: self.name.clone(),
            subjects: self.subjects.clone(),
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            max_age: self.max_age,
            max_bytes: self.max_bytes,
            max_messages: UNLIMITED,
            num_replicas: self.replicas,
            discard: stream::DiscardPolicy::Old,
            duplicate_window: DUPLICATE_WINDOW,
            ..Default::default()
        }
    }

    fn validate(&self) -> EventResult<()> {
        if self.name.is_empty() {
            return Err(EventError::bad_request("stream name is required"));
        }

        if self.subjects.is_empty() {
            return Err(EventError::bad_request("stream subjects are required"));
        }

        Ok(())
    }
}

/// Summary of a stream's configuration and current state
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    pub max_bytes: i64,
    pub replicas: usize,
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

impl From<&stream::Info> for StreamInfo {
    fn from(info: &stream::Info) -> Self {
        Self {
            name: info.config.name.clone(),
            subjects: info.config.subjects.clone(),
            max_age: info.config.max_age,
            max_bytes: info.config.max_bytes,
            replicas: info.config.num_replicas,
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        }
    }
}

/// Outcome of [`StreamAdmin::ensure_stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// Broker operations needed to manage streams
#[async_trait]
pub trait StreamBackend: Send + Sync {
    async fn stream_info(&self, name: &str) -> Result<StreamInfo, BoxError>;

    async fn add_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BoxError>;

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BoxError>;

    async fn delete_stream(&self, name: &str) -> Result<(), BoxError>;
}

#[async_trait]
impl StreamBackend for jetstream::Context {
    async fn stream_info(&self, name: &str) -> Result<StreamInfo, BoxError> {
        let stream = self.get_stream(name).await?;
        Ok(StreamInfo::from(stream.cached_info()))
    }

    async fn add_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BoxError> {
        let stream = self.create_stream(config.to_nats_config()).await?;
        Ok(StreamInfo::from(stream.cached_info()))
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BoxError> {
        let info = jetstream::Context::update_stream(self, config.to_nats_config()).await?;
        Ok(StreamInfo::from(&info))
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BoxError> {
        jetstream::Context::delete_stream(self, name).await?;
        Ok(())
    }
}

/// The platform's fixed stream topology, one stream per bounded context
pub fn default_streams() -> Vec<StreamConfig> {
    [
        ("AUTH_EVENTS", "auth.>"),
        ("CATALOG_EVENTS", "catalog.>"),
        ("DDMRP_EVENTS", "ddmrp.>"),
        ("EXECUTION_EVENTS", "execution.>"),
        ("ANALYTICS_EVENTS", "analytics.>"),
        ("AI_AGENT_EVENTS", "ai_agent.>"),
        ("DLQ_EVENTS", "dlq.>"),
    ]
    .into_iter()
    .map(|(name, subject)| StreamConfig::new(name, vec![subject.to_string()]))
    .collect()
}

/// Creates, updates, deletes and inspects streams
#[derive(Debug, Clone)]
pub struct StreamAdmin<B = jetstream::Context> {
    backend: B,
}

impl<B: StreamBackend> StreamAdmin<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn create_stream(&self, config: &StreamConfig) -> EventResult<StreamInfo> {
        config.validate()?;

        let info = self.backend.add_stream(config).await.map_err(|e| {
            warn!(stream = %config.name, error = %e, "Failed to create stream");
            EventError::internal_with("failed to create stream", e)
        })?;

        info!(stream = %config.name, subjects = ?config.subjects, "Created stream");
        Ok(info)
    }

    pub async fn update_stream(&self, config: &StreamConfig) -> EventResult<StreamInfo> {
        config.validate()?;

        let info = self.backend.update_stream(config).await.map_err(|e| {
            warn!(stream = %config.name, error = %e, "Failed to update stream");
            EventError::internal_with("failed to update stream", e)
        })?;

        info!(stream = %config.name, "Updated stream");
        Ok(info)
    }

    pub async fn delete_stream(&self, name: &str) -> EventResult<()> {
        if name.is_empty() {
            return Err(EventError::bad_request("stream name is required"));
        }

        self.backend
            .delete_stream(name)
            .await
            .map_err(|e| EventError::internal_with("failed to delete stream", e))?;

        info!(stream = %name, "Deleted stream");
        Ok(())
    }

    pub async fn get_stream_info(&self, name: &str) -> EventResult<StreamInfo> {
        if name.is_empty() {
            return Err(EventError::bad_request("stream name is required"));
        }

        self.backend
            .stream_info(name)
            .await
            .map_err(|e| EventError::internal_with("failed to get stream info", e))
    }

    /// Create the stream unless one with the same name already exists.
    ///
    /// An existing stream is left untouched, even if its config differs.
    pub async fn ensure_stream(&self, config: &StreamConfig) -> EventResult<Provisioned> {
        config.validate()?;

        if self.backend.stream_info(&config.name).await.is_ok() {
            debug!(stream = %config.name, "Stream already exists");
            return Ok(Provisioned::AlreadyExists);
        }

        self.create_stream(config).await?;
        Ok(Provisioned::Created)
    }

    /// Create every stream from [`default_streams`], stopping at the first failure
    pub async fn create_default_streams(&self) -> EventResult<()> {
        for config in default_streams() {
            self.create_stream(&config).await?;
        }
        Ok(())
    }

    /// Idempotent variant of [`create_default_streams`](Self::create_default_streams)
    pub async fn ensure_default_streams(&self) -> EventResult<Vec<(String, Provisioned)>> {
        let mut outcomes = Vec::new();
        for config in default_streams() {
            let outcome = self.ensure_stream(&config).await?;
            outcomes.push((config.name, outcome));
        }
        Ok(outcomes)
    }
}
