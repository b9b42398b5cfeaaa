//! Optional per-event-type payload checks.
//!
//! Event payloads are an open map. Producers that want a stricter contract
//! for a given event type register a JSON Schema for it here; events of
//! unregistered types only get envelope validation.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{EventError, EventResult};
use crate::event::Event;

/// JSON Schemas keyed by event type
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, JSONSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register the schema for `event_type`, replacing any
    /// previous one.
    pub fn register(&mut self, event_type: impl Into<String>, schema: &Value) -> EventResult<()> {
        let event_type = event_type.into();
        let compiled = JSONSchema::compile(schema).map_err(|e| {
            EventError::bad_request(format!(
                "failed to compile schema for {event_type}: {e}"
            ))
        })?;
        self.schemas.insert(event_type, compiled);
        Ok(())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.schemas.contains_key(event_type)
    }

    /// Validate the envelope, then the payload against the schema registered
    /// for its type (if any).
    pub fn validate(&self, event: &Event) -> EventResult<()> {
        event.validate()?;

        let Some(schema) = self.schemas.get(&event.event_type) else {
            return Ok(());
        };

        let payload = Value::Object(event.data.clone());
        if let Err(errors) = schema.validate(&payload) {
            let msgs: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(EventError::bad_request(format!(
                "data for {} failed schema validation: {}",
                event.event_type,
                msgs.join("; ")
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("event_types", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use chrono::Utc;
    use serde_json::json;

    fn product_created_schema() -> Value {
        json!({
            "type": "object",
            "required": ["product_id", "sku"],
            "properties": {
                "product_id": {"type": "string"},
                "sku": {"type": "string", "minLength": 1}
            }
        })
    }

    fn event_with(event_type: &str, data: Value) -> Event {
        let data: EventData = serde_json::from_value(data).unwrap();
        Event::new(event_type, "catalog-service", "org-1", Utc::now(), data)
    }

    #[test]
    fn test_registered_type_is_checked() {
        let mut registry = SchemaRegistry::new();
        registry
            .register("catalog.product.created", &product_created_schema())
            .unwrap();

        let ok = event_with(
            "catalog.product.created",
            json!({"product_id": "p-1", "sku": "SKU-1"}),
        );
        assert!(registry.validate(&ok).is_ok());

        let missing_sku = event_with("catalog.product.created", json!({"product_id": "p-1"}));
        let err = registry.validate(&missing_sku).unwrap_err();
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("sku"));
    }

    #[test]
    fn test_unregistered_type_passes() {
        let registry = SchemaRegistry::new();
        let event = event_with("catalog.product.deleted", json!({"anything": true}));
        assert!(registry.validate(&event).is_ok());
    }

    #[test]
    fn test_envelope_checked_before_schema() {
        let mut registry = SchemaRegistry::new();
        registry
            .register("catalog.product.created", &product_created_schema())
            .unwrap();

        let mut event = event_with(
            "catalog.product.created",
            json!({"product_id": "p-1", "sku": "SKU-1"}),
        );
        event.source.clear();

        let err = registry.validate(&event).unwrap_err();
        assert!(err.to_string().contains("event source"));
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register("broken", &json!({"type": 12}))
            .unwrap_err();
        assert!(err.is_bad_request());
        assert!(!registry.contains("broken"));
    }
}
