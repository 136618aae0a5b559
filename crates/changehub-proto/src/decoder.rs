//! Decoding of raw upstream notifications.

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::event::{DomainEvent, Operation};
use crate::topic::TopicRegistry;

/// Decodes raw notification payloads into [`DomainEvent`]s.
///
/// Decoding is pure: the same bytes always produce the same result.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    registry: TopicRegistry,
}

impl EventDecoder {
    /// Create a decoder that accepts the topics in `registry`.
    pub fn new(registry: TopicRegistry) -> Self {
        Self { registry }
    }

    /// Get the topic registry.
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Decode one raw notification payload.
    pub fn decode(&self, raw: &[u8]) -> Result<DomainEvent, DecodeError> {
        let root: Value = serde_json::from_slice(raw)
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid JSON: {}", e)))?;

        let object = root
            .as_object()
            .ok_or_else(|| malformed("payload is not a JSON object"))?;

        let tag = string_field(object, &["topic", "table"])?;
        let operation: Operation = string_field(object, &["operation", "action"])?.parse()?;

        let data = match object.get("data") {
            Some(Value::Object(data)) => data,
            Some(_) => return Err(malformed("'data' is not an object")),
            None => return Err(malformed("missing 'data' object")),
        };
        let entity_id = entity_id(data)?;

        // Structure is checked before the topic so that garbage never
        // reports as an unknown topic.
        let topic = self
            .registry
            .resolve(tag)
            .ok_or_else(|| DecodeError::UnknownTopic(tag.to_string()))?;

        Ok(DomainEvent {
            topic: topic.to_string(),
            operation,
            entity_id,
            payload: Value::Object(data.clone()),
        })
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new(TopicRegistry::with_defaults())
    }
}

fn malformed(msg: &str) -> DecodeError {
    DecodeError::MalformedPayload(msg.to_string())
}

/// First present key among `keys`, which must hold a string.
fn string_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Result<&'a str, DecodeError> {
    let value = keys
        .iter()
        .find_map(|key| object.get(*key))
        .ok_or_else(|| DecodeError::MalformedPayload(format!("missing '{}'", keys.join("' or '"))))?;

    value
        .as_str()
        .ok_or_else(|| DecodeError::MalformedPayload(format!("'{}' is not a string", keys[0])))
}

fn entity_id(data: &Map<String, Value>) -> Result<String, DecodeError> {
    match data.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(_) => Err(malformed("'data.id' must be a non-empty string or a number")),
        None => Err(malformed("missing 'data.id'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> EventDecoder {
        EventDecoder::default()
    }

    #[test]
    fn test_decode_asset_create() {
        let raw = br#"{"topic":"asset","operation":"CREATE","data":{"id":"a1","name":"router"}}"#;
        let event = decoder().decode(raw).unwrap();

        assert_eq!(event.topic, "asset");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.entity_id, "a1");
        assert_eq!(event.payload["name"], "router");
    }

    #[test]
    fn test_decode_trigger_dialect() {
        let raw = br#"{"table":"users","action":"INSERT","data":{"id":42,"x":1.5,"y":2.0}}"#;
        let event = decoder().decode(raw).unwrap();

        assert_eq!(event.topic, "user");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.entity_id, "42");
        assert_eq!(event.payload["x"], 1.5);
    }

    #[test]
    fn test_topic_takes_precedence_over_table() {
        let raw = br#"{"topic":"incident","table":"incidents_v2","operation":"DELETE","data":{"id":"i9"}}"#;
        let event = decoder().decode(raw).unwrap();
        assert_eq!(event.topic, "incident");
        assert_eq!(event.operation, Operation::Delete);
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: &[&[u8]] = &[
            b"",
            b"not json",
            b"\xff\xfe\x00",
            b"[1,2,3]",
            br#"{"operation":"CREATE","data":{"id":"a1"}}"#,
            br#"{"topic":"asset","data":{"id":"a1"}}"#,
            br#"{"topic":"asset","operation":"MERGE","data":{"id":"a1"}}"#,
            br#"{"topic":"asset","operation":"CREATE"}"#,
            br#"{"topic":"asset","operation":"CREATE","data":"a1"}"#,
            br#"{"topic":"asset","operation":"CREATE","data":{"name":"x"}}"#,
            br#"{"topic":"asset","operation":"CREATE","data":{"id":""}}"#,
            br#"{"topic":"asset","operation":"CREATE","data":{"id":{"nested":1}}}"#,
            br#"{"topic":7,"operation":"CREATE","data":{"id":"a1"}}"#,
        ];

        for raw in cases {
            let result = decoder().decode(raw);
            assert!(
                matches!(result, Err(DecodeError::MalformedPayload(_))),
                "expected malformed for {:?}, got {:?}",
                String::from_utf8_lossy(raw),
                result
            );
        }
    }

    #[test]
    fn test_unknown_topic() {
        let raw = br#"{"table":"audit_log","action":"UPDATE","data":{"id":1}}"#;
        assert_eq!(
            decoder().decode(raw),
            Err(DecodeError::UnknownTopic("audit_log".to_string()))
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        let raw = br#"{"topic":"car","operation":"update","data":{"id":"c1","x":3}}"#;
        assert_eq!(decoder().decode(raw), decoder().decode(raw));
    }
}
