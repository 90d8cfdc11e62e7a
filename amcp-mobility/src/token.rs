//! `MigrationToken`, the serialized package transferred between contexts
//! during dispatch/clone (§3, §6 "Persisted state layout (mobility)").
//!
//! Wire-format encoding (base64 state blob, UUID nonce) follows
//! `llmspell-protocol`'s `MessageHeader` pattern of minting a
//! `Uuid::new_v4()` id per message; the JSON shape itself is taken
//! verbatim from spec.md §6's literal layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amcp_broker::SubscriptionOptions;
use amcp_cloudevents::CloudEventJson;
use amcp_core::AgentId;

mod base64_state {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        base64::engine::general_purpose::STANDARD
            .encode(bytes)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}

/// One subscription pattern plus its QoS options, carried inside a
/// [`MigrationToken`] so the destination can re-establish it verbatim
/// (§4.6 step 4 "re-establish subscriptions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub pattern: String,
    pub options: SubscriptionOptions,
}

/// The serialized hand-off package (§3 `MigrationToken`, §6 wire layout).
///
/// `agent_id` is the identity the *destination* will instantiate: for
/// `dispatch`/`migrate`/`retract` this is the same id the source agent
/// already has; for `clone` it is the freshly minted id of the new
/// instance (§4.6 "D gives the new instance a fresh `AgentID`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationToken {
    pub agent_id: AgentId,
    pub source: String,
    pub dest: String,
    #[serde(with = "base64_state")]
    pub state: Vec<u8>,
    pub subscriptions: Vec<SubscriptionSnapshot>,
    pub queued: Vec<CloudEventJson>,
    pub nonce: String,
    pub started_at: DateTime<Utc>,
}

impl MigrationToken {
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        source: impl Into<String>,
        dest: impl Into<String>,
        state: Vec<u8>,
        subscriptions: Vec<SubscriptionSnapshot>,
        queued: Vec<CloudEventJson>,
    ) -> Self {
        Self {
            agent_id,
            source: source.into(),
            dest: dest.into(),
            state,
            subscriptions,
            queued,
            nonce: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json_with_base64_state() {
        let token = MigrationToken::new(
            AgentId::new("a1", "counter"),
            "urn:context:s",
            "urn:context:d",
            vec![1, 2, 3, 4],
            vec![SubscriptionSnapshot {
                pattern: "counter.inc".to_string(),
                options: SubscriptionOptions::default(),
            }],
            vec![],
        );

        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"state\":\""));
        let decoded: MigrationToken = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.state, token.state);
        assert_eq!(decoded.agent_id, token.agent_id);
        assert_eq!(decoded.nonce, token.nonce);
    }
}
