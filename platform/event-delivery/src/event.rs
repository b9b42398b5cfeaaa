//! # Event Envelope
//!
//! The unit of data exchanged on the bus. One JSON object per message:
//!
//! ```text
//! { "id", "type", "source", "organization_id", "timestamp" (RFC3339),
//!   "schema_version", "data" }
//! ```
//!
//! `correlation_id` and `causation_id` are optional and only appear on the
//! wire when set.
//!
//! Envelopes are built once by the producer and never mutated afterwards.
//! Consumers receive a fresh copy per delivery.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{EventError, EventResult};

/// Schema version stamped on every new envelope
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// Organization sentinel for events whose tenant cannot be determined,
/// e.g. a failed login before any user record exists.
pub const UNKNOWN_ORGANIZATION: &str = "unknown";

/// Open key -> JSON value payload. Insertion order is preserved.
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Seconds from the Unix epoch back to 0001-01-01T00:00:00Z
const ZERO_TIMESTAMP_SECS: i64 = -62_135_596_800;

/// The unset timestamp, `0001-01-01T00:00:00Z`.
///
/// Producers on other runtimes write this for a zero time value, so it is
/// the sentinel `validate` rejects. The Unix epoch is a real timestamp.
pub fn zero_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIMESTAMP_SECS, 0).unwrap_or_default()
}

/// `"data": null` decodes as an empty payload
fn null_as_empty<'de, D>(deserializer: D) -> Result<EventData, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<EventData>::deserialize(deserializer)?.unwrap_or_default())
}

/// Standard event envelope
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use event_delivery::{Event, EventData};
/// use serde_json::json;
///
/// let mut data = EventData::new();
/// data.insert("product_id".to_string(), json!("prod-1"));
///
/// let event = Event::new("catalog.product.created", "catalog-service", "org-1", Utc::now(), data);
/// assert!(event.validate().is_ok());
///
/// let bytes = event.to_json().unwrap();
/// assert_eq!(Event::from_json(&bytes).unwrap(), event);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier, also used as the broker's dedup key
    #[serde(default)]
    pub id: String,

    /// Dot-namespaced business event name (e.g. `user.login.succeeded`)
    #[serde(rename = "type", default)]
    pub event_type: String,

    /// Emitting service name
    #[serde(default)]
    pub source: String,

    /// Tenant scope, or [`UNKNOWN_ORGANIZATION`]
    #[serde(default)]
    pub organization_id: String,

    /// When the event occurred (not when it was delivered)
    #[serde(default = "zero_timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub schema_version: String,

    /// Links related events in a business transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Links this event to the command/event that caused it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: EventData,
}

impl Event {
    /// Create a new envelope with a fresh id and the default schema version
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        organization_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: EventData,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            organization_id: organization_id.into(),
            timestamp,
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            correlation_id: None,
            causation_id: None,
            data,
        }
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the causation ID
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Check that every required field is populated.
    ///
    /// Fields are checked in a fixed order and the first missing one is
    /// named: id, type, source, organization_id, timestamp, schema_version.
    pub fn validate(&self) -> EventResult<()> {
        if self.id.is_empty() {
            return Err(EventError::bad_request("event ID is required"));
        }

        if self.event_type.is_empty() {
            return Err(EventError::bad_request("event type is required"));
        }

        if self.source.is_empty() {
            return Err(EventError::bad_request("event source is required"));
        }

        if self.organization_id.is_empty() {
            return Err(EventError::bad_request("organization_id is required"));
        }

        if self.timestamp == zero_timestamp() {
            return Err(EventError::bad_request("timestamp is required"));
        }

        if self.schema_version.is_empty() {
            return Err(EventError::bad_request("schema_version is required"));
        }

        Ok(())
    }

    /// Serialize to the JSON wire format
    pub fn to_json(&self) -> EventResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| EventError::bad_request(format!("failed to marshal event: {e}")))
    }

    /// Deserialize from the JSON wire format
    pub fn from_json(bytes: &[u8]) -> EventResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| EventError::bad_request(format!("failed to unmarshal event: {e}")))
    }

    /// Decode `data` into a typed payload
    pub fn data_as<T: DeserializeOwned>(&self) -> EventResult<T> {
        serde_json::from_value(serde_json::Value::Object(self.data.clone())).map_err(|e| {
            EventError::bad_request(format!(
                "event data does not match {}: {e}",
                std::any::type_name::<T>()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_data() -> EventData {
        let mut data = EventData::new();
        data.insert("product_id".to_string(), json!("prod-123"));
        data.insert("quantity".to_string(), json!(42));
        data.insert("tags".to_string(), json!(["a", "b"]));
        data.insert("dimensions".to_string(), json!({"w": 1.5, "h": 2}));
        data
    }

    fn sample_event() -> Event {
        Event::new(
            "catalog.product.created",
            "catalog-service",
            "org-123",
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            sample_data(),
        )
    }

    #[test]
    fn test_new_event_is_fully_populated() {
        let event = sample_event();

        assert!(Uuid::parse_str(&event.id).is_ok());
        assert_eq!(event.schema_version, DEFAULT_SCHEMA_VERSION);
        assert_eq!(event.event_type, "catalog.product.created");
        assert!(event.correlation_id.is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = sample_event();
        let b = sample_event();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_unknown_organization_is_accepted() {
        let event = Event::new(
            "user.login.failed",
            "auth-service",
            UNKNOWN_ORGANIZATION,
            Utc::now(),
            EventData::new(),
        );
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_validate_names_missing_field() {
        let cases: Vec<(&str, Box<dyn Fn(&mut Event)>)> = vec![
            ("event ID", Box::new(|e: &mut Event| e.id.clear())),
            ("event type", Box::new(|e: &mut Event| e.event_type.clear())),
            ("event source", Box::new(|e: &mut Event| e.source.clear())),
            ("organization_id", Box::new(|e: &mut Event| e.organization_id.clear())),
            ("timestamp", Box::new(|e: &mut Event| e.timestamp = zero_timestamp())),
            ("schema_version", Box::new(|e: &mut Event| e.schema_version.clear())),
        ];

        for (field, strip) in cases {
            let mut event = sample_event();
            strip(&mut event);

            let err = event.validate().unwrap_err();
            assert!(err.is_bad_request());
            assert!(
                err.to_string().contains(field),
                "expected '{}' in '{}'",
                field,
                err
            );
        }
    }

    #[test]
    fn test_zero_timestamp_from_the_wire_is_unset() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&sample_event().to_json().unwrap()).unwrap();
        value["timestamp"] = json!("0001-01-01T00:00:00Z");

        let event = Event::from_json(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(event.timestamp, zero_timestamp());
        let err = event.validate().unwrap_err();
        assert!(err.to_string().contains("timestamp"));

        let mut epoch = sample_event();
        epoch.timestamp = Utc.timestamp_opt(0, 0).unwrap();
        assert!(epoch.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_first_missing_field() {
        let mut event = sample_event();
        event.source.clear();
        event.schema_version.clear();

        let err = event.validate().unwrap_err();
        assert!(err.to_string().contains("event source"));
    }

    #[test]
    fn test_json_round_trip() {
        let event = sample_event()
            .with_correlation_id("corr-1")
            .with_causation_id("cause-1");

        let bytes = event.to_json().unwrap();
        let decoded = Event::from_json(&bytes).unwrap();

        assert_eq!(decoded, event);
        // Payload key order survives the trip
        let keys: Vec<&String> = decoded.data.keys().collect();
        assert_eq!(keys, vec!["product_id", "quantity", "tags", "dimensions"]);
    }

    #[test]
    fn test_json_round_trip_preserves_computed_floats() {
        let mut data = EventData::new();
        for i in 1..2000 {
            let value = i as f64 / 7.0 * 1.37;
            data.insert(format!("v{i}"), json!(value));
        }
        data.insert("tiny".to_string(), json!(f64::MIN_POSITIVE));
        data.insert("huge".to_string(), json!(f64::MAX));
        let third = 0.1 + 0.2;
        data.insert("third".to_string(), json!(third));
        let event = Event::new("ddmrp.adu.calculated", "ddmrp-engine-service", "org-1", Utc::now(), data);

        let decoded = Event::from_json(&event.to_json().unwrap()).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn test_null_data_decodes_as_empty_payload() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&sample_event().to_json().unwrap()).unwrap();
        value["data"] = serde_json::Value::Null;

        let event = Event::from_json(&serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(event.data.is_empty());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_wire_format_field_names() {
        let event = sample_event();
        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "catalog.product.created");
        assert_eq!(value["organization_id"], "org-123");
        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["timestamp"], "2024-01-15T10:30:00Z");
        assert!(value.get("correlation_id").is_none());
        assert!(value.get("causation_id").is_none());
    }

    #[test]
    fn test_from_json_malformed_is_bad_request() {
        for input in [&b"not json"[..], b"", b"{\"id\": 5}", b"[1,2,3]"] {
            let err = Event::from_json(input).unwrap_err();
            assert!(err.is_bad_request(), "input {:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn test_from_json_missing_fields_fail_validation() {
        let event = Event::from_json(br#"{"type": "x.y", "data": {}}"#).unwrap();
        let err = event.validate().unwrap_err();
        assert!(err.to_string().contains("event ID"));
    }

    #[test]
    fn test_data_as_typed_payload() {
        #[derive(Debug, Deserialize)]
        struct ProductCreated {
            product_id: String,
            quantity: u32,
        }

        let payload: ProductCreated = sample_event().data_as().unwrap();
        assert_eq!(payload.product_id, "prod-123");
        assert_eq!(payload.quantity, 42);

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Mismatch {
            missing_field: String,
        }
        assert!(sample_event().data_as::<Mismatch>().unwrap_err().is_bad_request());
    }
}
