/*!
 * Core value types: `Value`, `Properties`, and `Event`.
 *
 * An event is an immutable pairing of a hierarchical topic with a
 * property map. Events are shared between the handler tasks of one
 * delivery via `Arc`, so construction validates the topic once and the
 * payload is never mutated afterwards.
 */

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BusResult;
use crate::event::topic;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/**
 * A dynamically typed property value.
 *
 * `Opaque` carries a reference tag for payloads the bus does not
 * interpret (object handles, correlation ids). Predicates compare it
 * like a string.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Opaque(String),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

/// Property map of an event: string keys to dynamically typed values.
pub type Properties = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/**
 * An immutable bus event.
 *
 * The topic is validated against the grammar on construction; a
 * malformed topic is an invalid-argument error and nothing is queued.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    topic: String,
    properties: Properties,
}

impl Event {
    /**
     * Creates an event with the given topic and property map.
     *
     * # Arguments
     * * `topic` — slash-separated concrete topic (no wildcards).
     * * `properties` — the property map; may be empty.
     */
    pub fn new(topic: impl Into<String>, properties: Properties) -> BusResult<Self> {
        let topic = topic.into();
        topic::validate_topic(&topic)?;
        Ok(Self { topic, properties })
    }

    /**
     * Convenience constructor for an event without properties.
     */
    pub fn with_topic(topic: impl Into<String>) -> BusResult<Self> {
        Self::new(topic, Properties::new())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Looks up a single property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_construction() {
        let mut props = Properties::new();
        props.insert("k".into(), "v".into());
        let event = Event::new("org/example/X", props).expect("valid topic");
        assert_eq!(event.topic(), "org/example/X");
        assert_eq!(event.property("k"), Some(&Value::Str("v".into())));
        assert_eq!(event.property("missing"), None);
    }

    #[test]
    fn test_event_rejects_malformed_topic() {
        assert!(Event::with_topic("org//X").is_err());
        assert!(Event::with_topic("org/*").is_err());
    }

    /**
     * Values survive a serde round-trip; events are plain data.
     */
    #[test]
    fn test_value_serde_round_trip() {
        let values = vec![
            Value::Str("s".into()),
            Value::Int(-7),
            Value::Bool(true),
            Value::Opaque("ref-42".into()),
        ];
        for value in values {
            let json = serde_json::to_string(&value).expect("serialize");
            let back: Value = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, value);
        }
    }
}
