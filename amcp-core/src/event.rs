//! The immutable event value and its builder (component C1).
//!
//! Grounded on `llmspell-events::universal_event::UniversalEvent` /
//! `UniversalEventBuilder` for the builder-validates-on-build shape and the
//! global monotonic sequence counter, generalized with the topic/subject/
//! dataSchema/correlationId/deliveryOptions fields spec.md §3 requires.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AmcpError;
use crate::identity::AgentId;

static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_sequence() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Segment grammar enforced on every topic: `[A-Za-z0-9_-]+` separated by
/// `.`, at least one segment, no leading/trailing/empty segments.
fn is_valid_topic(topic: &str) -> bool {
    if topic.is_empty() {
        return false;
    }
    topic.split('.').all(|seg| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

/// Delivery priority. Higher priority events jump ahead in the broker
/// queue but never reorder within the same subscription's `ordered` stream
/// (§4.3, §9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Per-event quality-of-service knobs (§3 `DeliveryOptions`).
///
/// QoS selection precedence is event `deliveryOptions` > subscription
/// defaults > broker defaults (§4.3); this type only models the event-level
/// layer, the other two live in `amcp-broker` and `amcp-runtime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    pub persistent: bool,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    pub ordered: bool,
    pub reliable: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            priority: Priority::Normal,
            ttl: None,
            ordered: false,
            reliable: false,
        }
    }
}

/// Opaque event payload: either bytes tagged with a content type, or a
/// structured JSON value (for `application/json` data content types).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Structured(serde_json::Value),
    Bytes(Vec<u8>),
    Empty,
}

impl Default for EventData {
    fn default() -> Self {
        Self::Empty
    }
}

/// The immutable event value (§3 `Event`). Once constructed via
/// [`EventBuilder::build`], no field mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: String,
    topic: String,
    event_type: String,
    source: String,
    subject: String,
    time: DateTime<Utc>,
    data_content_type: String,
    data_schema: Option<String>,
    data: EventData,
    correlation_id: Option<String>,
    sender: Option<AgentId>,
    metadata: HashMap<String, String>,
    delivery_options: DeliveryOptions,
    #[serde(skip)]
    sequence: u64,
}

impl PartialEq for Event {
    /// Equality on every wire-visible field; the process-local `sequence`
    /// counter is excluded since it is never part of a round-trip (§8
    /// item 6 "CloudEvents round-trip ... for every well-formed internal
    /// event").
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.topic == other.topic
            && self.event_type == other.event_type
            && self.source == other.source
            && self.subject == other.subject
            && self.time == other.time
            && self.data_content_type == other.data_content_type
            && self.data_schema == other.data_schema
            && self.data == other.data
            && self.correlation_id == other.correlation_id
            && self.sender == other.sender
            && self.metadata == other.metadata
            && self.delivery_options == other.delivery_options
    }
}

impl Event {
    /// Start building a new event for the given topic and source.
    #[must_use]
    pub fn builder(topic: impl Into<String>, source: impl Into<String>) -> EventBuilder {
        EventBuilder::new(topic, source)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub const fn time(&self) -> DateTime<Utc> {
        self.time
    }

    #[must_use]
    pub fn data_content_type(&self) -> &str {
        &self.data_content_type
    }

    #[must_use]
    pub fn data_schema(&self) -> Option<&str> {
        self.data_schema.as_deref()
    }

    #[must_use]
    pub const fn data(&self) -> &EventData {
        &self.data
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    #[must_use]
    pub const fn sender(&self) -> Option<&AgentId> {
        self.sender.as_ref()
    }

    #[must_use]
    pub const fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub const fn delivery_options(&self) -> &DeliveryOptions {
        &self.delivery_options
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this event carries every field CloudEvents v1.0 requires
    /// and no reserved-prefix extension keys (§3 `isCloudEventsCompliant`).
    #[must_use]
    pub fn is_cloud_events_compliant(&self) -> bool {
        !self.id.is_empty()
            && !self.event_type.is_empty()
            && !self.source.is_empty()
            && self
                .metadata
                .keys()
                .all(|k| !k.starts_with("ce-"))
    }

    /// Whether `time + ttl` has passed relative to `now` (§4.3 TTL drop).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.delivery_options.ttl {
            Some(ttl) => match chrono::Duration::from_std(ttl) {
                Ok(d) => now > self.time + d,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Re-stamp `time`/`id` if absent at publish time is the broker's job
    /// (§4.3); this helper lets the broker produce a new value with a
    /// fresh time without going through the builder's validation again,
    /// used only for already-validated events.
    #[must_use]
    pub(crate) fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// The only constructor path for [`Event`] (§4.1 "Builder is the only
/// constructor path").
#[derive(Debug, Clone)]
pub struct EventBuilder {
    id: Option<String>,
    topic: String,
    event_type: Option<String>,
    source: String,
    subject: Option<String>,
    time: Option<DateTime<Utc>>,
    data_content_type: Option<String>,
    data_schema: Option<String>,
    data: EventData,
    correlation_id: Option<String>,
    sender: Option<AgentId>,
    metadata: HashMap<String, String>,
    delivery_options: DeliveryOptions,
}

impl EventBuilder {
    fn new(topic: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: None,
            topic: topic.into(),
            event_type: None,
            source: source.into(),
            subject: None,
            time: None,
            data_content_type: None,
            data_schema: None,
            data: EventData::Empty,
            correlation_id: None,
            sender: None,
            metadata: HashMap::new(),
            delivery_options: DeliveryOptions::default(),
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub const fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    #[must_use]
    pub fn data_content_type(mut self, data_content_type: impl Into<String>) -> Self {
        self.data_content_type = Some(data_content_type.into());
        self
    }

    #[must_use]
    pub fn data_schema(mut self, data_schema: impl Into<String>) -> Self {
        self.data_schema = Some(data_schema.into());
        self
    }

    #[must_use]
    pub fn data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn json_data(mut self, value: serde_json::Value) -> Self {
        self.data = EventData::Structured(value);
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: AgentId) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn delivery_options(mut self, options: DeliveryOptions) -> Self {
        self.delivery_options = options;
        self
    }

    /// Validate and produce the immutable [`Event`] (§4.1).
    ///
    /// Rejects malformed topics, empty source, and reserved-prefix
    /// metadata keys.
    pub fn build(self) -> Result<Event, AmcpError> {
        if !is_valid_topic(&self.topic) {
            return Err(AmcpError::validation(format!(
                "invalid topic `{}`: must match `^[A-Za-z0-9_-]+(\\.[A-Za-z0-9_-]+)*$`",
                self.topic
            )));
        }
        if self.source.is_empty() {
            return Err(AmcpError::validation("event source must not be empty"));
        }
        if let Some(bad) = self.metadata.keys().find(|k| k.starts_with("ce-")) {
            return Err(AmcpError::validation(format!(
                "metadata key `{bad}` uses reserved prefix `ce-`"
            )));
        }

        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let event_type = self
            .event_type
            .unwrap_or_else(|| format!("io.amcp.event.{}", self.topic));
        let time = self.time.unwrap_or_else(Utc::now);
        let subject = self.subject.unwrap_or_else(|| self.topic.clone());
        let data_content_type = self
            .data_content_type
            .unwrap_or_else(|| "application/json".to_string());

        Ok(Event {
            id,
            topic: self.topic,
            event_type,
            source: self.source,
            subject,
            time,
            data_content_type,
            data_schema: self.data_schema,
            data: self.data,
            correlation_id: self.correlation_id,
            sender: self.sender,
            metadata: self.metadata,
            delivery_options: self.delivery_options,
            sequence: next_sequence(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_stamps_defaults() {
        let event = Event::builder("weather.alert.severe", "urn:agent:producer")
            .build()
            .unwrap();
        assert_eq!(event.event_type(), "io.amcp.event.weather.alert.severe");
        assert_eq!(event.subject(), "weather.alert.severe");
        assert_eq!(event.data_content_type(), "application/json");
        assert!(!event.id().is_empty());
    }

    #[test]
    fn rejects_malformed_topic() {
        let err = Event::builder("weather..alert", "urn:agent:producer").build();
        assert!(err.is_err());

        let err = Event::builder("weather.alert!", "urn:agent:producer").build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_reserved_metadata_prefix() {
        let err = Event::builder("a.b", "urn:agent:p")
            .metadata("ce-foo", "bar")
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn sequence_increases_monotonically() {
        let e1 = Event::builder("a.b", "urn:x").build().unwrap();
        let e2 = Event::builder("a.b", "urn:x").build().unwrap();
        assert!(e2.sequence() > e1.sequence());
    }

    #[test]
    fn ttl_expiry_is_relative_to_stamped_time() {
        let event = Event::builder("a.b", "urn:x")
            .delivery_options(DeliveryOptions {
                ttl: Some(Duration::from_secs(1)),
                ..Default::default()
            })
            .build()
            .unwrap();
        assert!(!event.is_expired_at(event.time()));
        assert!(event.is_expired_at(event.time() + chrono::Duration::seconds(2)));
    }
}
