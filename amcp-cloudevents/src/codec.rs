//! Bidirectional CloudEvents v1.0 mapping (§4.1).
//!
//! No teacher file implements CloudEvents directly; the mapping table is
//! taken verbatim from spec.md §4.1 and expressed with the workspace's
//! `serde_json::Value` idiom for opaque/extension data
//! (`llmspell-protocol::types` uses the same pattern for its payload
//! fields).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use amcp_core::event::EventData;
use amcp_core::{AgentId, DeliveryOptions, Event, Priority};

use crate::error::CloudEventError;

const SPECVERSION: &str = "1.0";

/// A CloudEvents v1.0 structured-mode JSON document (attributes and `data`
/// all at the top level, per §4.1).
pub type CloudEventJson = Value;

/// A CloudEvents v1.0 binary-mode message: attributes carried as
/// transport headers, payload carried as the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEventBinary {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

fn is_valid_uri(s: &str) -> bool {
    let Some(colon) = s.find(':') else {
        return false;
    };
    let (scheme, _) = s.split_at(colon);
    !scheme.is_empty()
        && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
}

fn validate_extension_key(key: &str) -> Result<(), CloudEventError> {
    if key.starts_with("ce-") {
        return Err(CloudEventError::ReservedExtensionKey(key.to_string()));
    }
    Ok(())
}

fn priority_to_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
    }
}

fn priority_from_str(s: &str) -> Option<Priority> {
    match s {
        "low" => Some(Priority::Low),
        "normal" => Some(Priority::Normal),
        "high" => Some(Priority::High),
        _ => None,
    }
}

/// Encode an [`Event`] to structured-mode CloudEvents JSON (§4.1).
///
/// # Errors
/// Returns [`CloudEventError`] when `source` is not a URI or a metadata
/// key collides with the `ce-` reserved prefix (checked at event
/// construction already, re-checked here defensively).
pub fn to_cloud_event(event: &Event) -> Result<CloudEventJson, CloudEventError> {
    if !is_valid_uri(event.source()) {
        return Err(CloudEventError::InvalidSource(event.source().to_string()));
    }

    let mut map = Map::new();
    map.insert("specversion".into(), Value::String(SPECVERSION.into()));
    map.insert("type".into(), Value::String(event.event_type().to_string()));
    map.insert("source".into(), Value::String(event.source().to_string()));
    map.insert("id".into(), Value::String(event.id().to_string()));
    map.insert(
        "time".into(),
        Value::String(event.time().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );
    map.insert(
        "datacontenttype".into(),
        Value::String(event.data_content_type().to_string()),
    );
    if let Some(schema) = event.data_schema() {
        map.insert("dataschema".into(), Value::String(schema.to_string()));
    }
    map.insert("subject".into(), Value::String(event.subject().to_string()));

    match event.data() {
        EventData::Structured(value) => {
            map.insert("data".into(), value.clone());
        }
        EventData::Bytes(bytes) => {
            use base64::Engine;
            map.insert(
                "data_base64".into(),
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
            );
        }
        EventData::Empty => {}
    }

    map.insert(
        "amcp-topic".into(),
        Value::String(event.topic().to_string()),
    );
    if let Some(sender) = event.sender() {
        map.insert(
            "amcp-sender".into(),
            Value::String(format!("{}:{}", sender.agent_type(), sender.id())),
        );
    }
    if let Some(correlation_id) = event.correlation_id() {
        map.insert(
            "amcp-correlation-id".into(),
            Value::String(correlation_id.to_string()),
        );
    }

    // Event-level QoS knobs (§3 `DeliveryOptions`) must survive the round
    // trip (§8 item 6); `Event::eq` compares them, so losing one here
    // makes `from_cloud_event(to_cloud_event(e)) != e`.
    let options = event.delivery_options();
    map.insert(
        "amcp-persistent".into(),
        Value::String(options.persistent.to_string()),
    );
    map.insert(
        "amcp-priority".into(),
        Value::String(priority_to_str(options.priority).to_string()),
    );
    if let Some(ttl) = options.ttl {
        map.insert(
            "amcp-ttl-ms".into(),
            Value::String(ttl.as_millis().to_string()),
        );
    }
    map.insert(
        "amcp-ordered".into(),
        Value::String(options.ordered.to_string()),
    );
    map.insert(
        "amcp-reliable".into(),
        Value::String(options.reliable.to_string()),
    );

    for (key, value) in event.metadata() {
        validate_extension_key(key)?;
        map.insert(format!("amcp-meta-{key}"), Value::String(value.clone()));
    }

    Ok(Value::Object(map))
}

fn parse_sender(raw: &str) -> Option<AgentId> {
    let (agent_type, id) = raw.split_once(':')?;
    Some(AgentId::new(id, agent_type))
}

/// Decode structured-mode CloudEvents JSON back into an [`Event`]
/// (§4.1, §8 item 6 round-trip).
///
/// # Errors
/// Returns [`CloudEventError`] on missing required attributes, a
/// non-RFC-3339 `time`, or a non-URI `source`.
pub fn from_cloud_event(ce: &CloudEventJson) -> Result<Event, CloudEventError> {
    let obj = ce
        .as_object()
        .ok_or_else(|| CloudEventError::Malformed("top-level value is not an object".into()))?;

    let get_str = |key: &'static str| -> Result<&str, CloudEventError> {
        obj.get(key)
            .and_then(Value::as_str)
            .ok_or(CloudEventError::MissingAttribute(key))
    };

    let event_type = get_str("type")?.to_string();
    let source = get_str("source")?.to_string();
    if !is_valid_uri(&source) {
        return Err(CloudEventError::InvalidSource(source));
    }
    let id = get_str("id")?.to_string();

    let time: DateTime<Utc> = obj
        .get("time")
        .and_then(Value::as_str)
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CloudEventError::InvalidTime(e.to_string()))
        })
        .transpose()?
        .unwrap_or_else(Utc::now);

    let topic = obj
        .get("amcp-topic")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| event_type.trim_start_matches("io.amcp.event.").to_string());

    let subject = get_str("subject").ok().map(str::to_string);

    let data_content_type = obj
        .get("datacontenttype")
        .and_then(Value::as_str)
        .map(str::to_string);

    let data_schema = obj
        .get("dataschema")
        .and_then(Value::as_str)
        .map(str::to_string);

    let data = if let Some(b64) = obj.get("data_base64").and_then(Value::as_str) {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| CloudEventError::InvalidBase64(e.to_string()))?;
        EventData::Bytes(bytes)
    } else if let Some(value) = obj.get("data") {
        EventData::Structured(value.clone())
    } else {
        EventData::Empty
    };

    let sender = obj
        .get("amcp-sender")
        .and_then(Value::as_str)
        .and_then(parse_sender);

    let correlation_id = obj
        .get("amcp-correlation-id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let delivery_options = DeliveryOptions {
        persistent: obj
            .get("amcp-persistent")
            .and_then(Value::as_str)
            .is_some_and(|s| s == "true"),
        priority: obj
            .get("amcp-priority")
            .and_then(Value::as_str)
            .and_then(priority_from_str)
            .unwrap_or_default(),
        ttl: obj
            .get("amcp-ttl-ms")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis),
        ordered: obj
            .get("amcp-ordered")
            .and_then(Value::as_str)
            .is_some_and(|s| s == "true"),
        reliable: obj
            .get("amcp-reliable")
            .and_then(Value::as_str)
            .is_some_and(|s| s == "true"),
    };

    let mut builder = Event::builder(topic, source)
        .id(id)
        .event_type(event_type)
        .time(time)
        .data(data)
        .delivery_options(delivery_options);

    if let Some(subject) = subject {
        builder = builder.subject(subject);
    }
    if let Some(dct) = data_content_type {
        builder = builder.data_content_type(dct);
    }
    if let Some(schema) = data_schema {
        builder = builder.data_schema(schema);
    }
    if let Some(sender) = sender {
        builder = builder.sender(sender);
    }
    if let Some(correlation_id) = correlation_id {
        builder = builder.correlation_id(correlation_id);
    }

    for key in obj.keys() {
        if let Some(meta_key) = key.strip_prefix("amcp-meta-") {
            if let Some(value) = obj.get(key).and_then(Value::as_str) {
                builder = builder.metadata(meta_key, value);
            }
        }
    }

    builder.build().map_err(CloudEventError::from)
}

/// Encode to binary mode: attributes as headers, payload as body
/// (§4.1, §6 "Wire format for cross-process transports").
///
/// # Errors
/// Same as [`to_cloud_event`].
pub fn to_cloud_event_binary(event: &Event) -> Result<CloudEventBinary, CloudEventError> {
    let structured = to_cloud_event(event)?;
    let obj = structured
        .as_object()
        .expect("to_cloud_event always returns an object");

    let mut headers = HashMap::new();
    let mut body = Vec::new();

    for (key, value) in obj {
        if key == "data" {
            body = serde_json::to_vec(value).unwrap_or_default();
            continue;
        }
        if key == "data_base64" {
            if let Some(s) = value.as_str() {
                use base64::Engine;
                body = base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .unwrap_or_default();
            }
            continue;
        }
        if let Some(s) = value.as_str() {
            headers.insert(format!("ce-{key}"), s.to_string());
        }
    }

    Ok(CloudEventBinary { headers, body })
}

/// Decode a binary-mode message back into an [`Event`].
///
/// # Errors
/// Same as [`from_cloud_event`].
pub fn from_cloud_event_binary(msg: &CloudEventBinary) -> Result<Event, CloudEventError> {
    let mut map = Map::new();
    for (key, value) in &msg.headers {
        let Some(attr) = key.strip_prefix("ce-") else {
            continue;
        };
        map.insert(attr.to_string(), Value::String(value.clone()));
    }

    if !msg.body.is_empty() {
        match serde_json::from_slice::<Value>(&msg.body) {
            Ok(value) => {
                map.insert("data".into(), value);
            }
            Err(_) => {
                use base64::Engine;
                map.insert(
                    "data_base64".into(),
                    Value::String(base64::engine::general_purpose::STANDARD.encode(&msg.body)),
                );
            }
        }
    }

    from_cloud_event(&Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_round_trip_preserves_fields() {
        let event = Event::builder("travel.plan.response", "urn:agent:concierge")
            .metadata("priority", "high")
            .correlation_id("abc")
            .json_data(serde_json::json!({"itinerary": "paris"}))
            .build()
            .unwrap();

        let ce = to_cloud_event(&event).unwrap();
        assert_eq!(ce["amcp-topic"], "travel.plan.response");
        assert_eq!(ce["amcp-meta-priority"], "high");
        assert_eq!(ce["amcp-correlation-id"], "abc");

        let decoded = from_cloud_event(&ce).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn structured_round_trip_preserves_delivery_options() {
        let event = Event::builder("orders.new", "urn:agent:producer")
            .delivery_options(DeliveryOptions {
                persistent: true,
                priority: Priority::High,
                ttl: Some(Duration::from_millis(5_000)),
                ordered: true,
                reliable: true,
            })
            .build()
            .unwrap();

        let ce = to_cloud_event(&event).unwrap();
        assert_eq!(ce["amcp-persistent"], "true");
        assert_eq!(ce["amcp-priority"], "high");
        assert_eq!(ce["amcp-ttl-ms"], "5000");
        assert_eq!(ce["amcp-ordered"], "true");
        assert_eq!(ce["amcp-reliable"], "true");

        let decoded = from_cloud_event(&ce).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.delivery_options().ttl, Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn binary_round_trip_preserves_fields() {
        let event = Event::builder("a.b.c", "urn:agent:x")
            .delivery_options(DeliveryOptions {
                priority: Priority::High,
                ..Default::default()
            })
            .build()
            .unwrap();

        let binary = to_cloud_event_binary(&event).unwrap();
        let decoded = from_cloud_event_binary(&binary).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn rejects_non_uri_source() {
        let event = Event::builder("a.b", "not-a-uri").build().unwrap();
        // Construction through the builder doesn't validate URI shape
        // (only non-emptiness); the CloudEvents boundary does.
        assert!(to_cloud_event(&event).is_err());
    }

    #[test]
    fn rejects_missing_required_attribute() {
        let ce = serde_json::json!({"specversion": "1.0", "source": "urn:agent:x"});
        assert!(from_cloud_event(&ce).is_err());
    }

    #[test]
    fn rejects_malformed_time() {
        let ce = serde_json::json!({
            "specversion": "1.0",
            "type": "io.amcp.event.a.b",
            "source": "urn:agent:x",
            "id": "1",
            "time": "not-a-timestamp",
        });
        assert!(from_cloud_event(&ce).is_err());
    }
}
