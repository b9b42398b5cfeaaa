//! Environment-driven configuration for services embedding the delivery layer.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::{ConnectionConfig, DEFAULT_CONNECTION_NAME};
use crate::error::{EventError, EventResult};
use crate::subscriber::SubscriberConfig;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsConfig {
    pub nats_url: String,
    pub connection_name: String,
    pub max_reconnects: usize,
    pub reconnect_wait: Duration,
    pub max_deliver: i64,
    pub ack_wait: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
            max_reconnects: 10,
            reconnect_wait: Duration::from_millis(2000),
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
        }
    }
}

impl EventsConfig {
    /// Load from the process environment, after reading `.env` if present
    pub fn from_env() -> EventResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> EventResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let nats_url = lookup("NATS_URL").unwrap_or(defaults.nats_url);
        if nats_url.trim().is_empty() {
            return Err(EventError::bad_request("NATS_URL must not be empty"));
        }

        let connection_name = lookup("NATS_CONNECTION_NAME")
            .filter(|name| !name.is_empty())
            .unwrap_or(defaults.connection_name);

        let max_reconnects =
            parse_var(&lookup, "NATS_MAX_RECONNECTS")?.unwrap_or(defaults.max_reconnects);
        let reconnect_wait = parse_var(&lookup, "NATS_RECONNECT_WAIT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_wait);

        let max_deliver = parse_var(&lookup, "EVENTS_MAX_DELIVER")?.unwrap_or(defaults.max_deliver);
        if max_deliver < 1 {
            return Err(EventError::bad_request(
                "EVENTS_MAX_DELIVER must be at least 1",
            ));
        }

        let ack_wait = parse_var(&lookup, "EVENTS_ACK_WAIT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.ack_wait);

        Ok(Self {
            nats_url,
            connection_name,
            max_reconnects,
            reconnect_wait,
            max_deliver,
            ack_wait,
        })
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.nats_url.clone())
            .with_connection_name(self.connection_name.clone());
        config.max_reconnects = Some(self.max_reconnects);
        config.reconnect_wait = self.reconnect_wait;
        config
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            max_deliver: self.max_deliver,
            ack_wait: self.ack_wait,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> EventResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EventError::bad_request(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> EventResult<EventsConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EventsConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, EventsConfig::default());
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.connection_name, "platform-service");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("NATS_URL", "nats://nats:4222"),
            ("NATS_CONNECTION_NAME", "ddmrp-service"),
            ("NATS_MAX_RECONNECTS", "3"),
            ("NATS_RECONNECT_WAIT_MS", "250"),
            ("EVENTS_MAX_DELIVER", "8"),
            ("EVENTS_ACK_WAIT_SECS", "10"),
        ])
        .unwrap();

        let connection = config.connection_config();
        assert_eq!(connection.url, "nats://nats:4222");
        assert_eq!(connection.connection_name, "ddmrp-service");
        assert_eq!(connection.max_reconnects, Some(3));
        assert_eq!(connection.reconnect_wait, Duration::from_millis(250));

        let subscriber = config.subscriber_config();
        assert_eq!(subscriber.max_deliver, 8);
        assert_eq!(subscriber.ack_wait, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let err = load(&[("NATS_MAX_RECONNECTS", "lots")]).unwrap_err();
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("NATS_MAX_RECONNECTS"));
    }

    #[test]
    fn test_rejects_empty_url_and_zero_max_deliver() {
        assert!(load(&[("NATS_URL", " ")]).unwrap_err().is_bad_request());
        assert!(load(&[("EVENTS_MAX_DELIVER", "0")])
            .unwrap_err()
            .to_string()
            .contains("EVENTS_MAX_DELIVER"));
    }
}
