use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{METADATA_KIND, PROFILE_QUERY_LIMIT};
use crate::error::ProtocolError;
use crate::event::Event;
use crate::types::IdentityKey;

const TAG_REQ: &str = "REQ";
const TAG_EVENT: &str = "EVENT";

/// Query filter carried by a subscribe request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(default)]
    pub kinds: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<IdentityKey>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Standing query for recent metadata events.
    pub fn metadata(limit: usize) -> Self {
        Self {
            kinds: vec![METADATA_KIND],
            authors: None,
            limit: Some(limit),
        }
    }

    /// Targeted query for the latest metadata of one author.
    pub fn metadata_for(author: IdentityKey) -> Self {
        Self {
            kinds: vec![METADATA_KIND],
            authors: Some(vec![author]),
            limit: Some(PROFILE_QUERY_LIMIT),
        }
    }
}

/// Every message exchanged with a relay, as a closed set of variants.
///
/// Wire forms:
/// - `["REQ", <subscription id>, <filter>]`
/// - `["EVENT", <subscription id>, <event>]` (relay to client)
/// - `["EVENT", <event>]` (client publishing)
/// - `["<anything else>", ...]` is kept only by its tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Subscribe {
        subscription_id: String,
        filter: Filter,
    },
    Event {
        subscription_id: Option<String>,
        event: Event,
    },
    Other {
        tag: String,
    },
}

impl Envelope {
    pub fn subscribe(subscription_id: impl Into<String>, filter: Filter) -> Self {
        Envelope::Subscribe {
            subscription_id: subscription_id.into(),
            filter,
        }
    }

    pub fn publish(event: Event) -> Self {
        Envelope::Event {
            subscription_id: None,
            event,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Envelope::Subscribe { .. } => TAG_REQ,
            Envelope::Event { .. } => TAG_EVENT,
            Envelope::Other { tag } => tag,
        }
    }

    /// Parse a raw wire message, rejecting anything that does not conform.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let mut items = match value {
            Value::Array(items) => items,
            _ => return Err(ProtocolError::NotAnArray),
        };

        let tag = items
            .first()
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingTag)?
            .to_string();

        match tag.as_str() {
            TAG_REQ => {
                if items.len() < 3 {
                    return Err(malformed(TAG_REQ, "expected subscription id and filter"));
                }
                let subscription_id = items[1]
                    .as_str()
                    .ok_or_else(|| malformed(TAG_REQ, "subscription id is not a string"))?
                    .to_string();
                let filter = serde_json::from_value(items.swap_remove(2))
                    .map_err(|e| malformed(TAG_REQ, &e.to_string()))?;
                Ok(Envelope::Subscribe {
                    subscription_id,
                    filter,
                })
            }
            TAG_EVENT => {
                let (subscription_id, event_value) = match items.len() {
                    2 => (None, items.swap_remove(1)),
                    3 => {
                        let id = items[1]
                            .as_str()
                            .ok_or_else(|| malformed(TAG_EVENT, "subscription id is not a string"))?
                            .to_string();
                        (Some(id), items.swap_remove(2))
                    }
                    n => return Err(malformed(TAG_EVENT, &format!("unexpected length {n}"))),
                };
                let event = serde_json::from_value(event_value)
                    .map_err(|e| malformed(TAG_EVENT, &e.to_string()))?;
                Ok(Envelope::Event {
                    subscription_id,
                    event,
                })
            }
            _ => Ok(Envelope::Other { tag }),
        }
    }

    pub fn to_json(&self) -> String {
        let value = match self {
            Envelope::Subscribe {
                subscription_id,
                filter,
            } => serde_json::json!([TAG_REQ, subscription_id, filter]),
            Envelope::Event {
                subscription_id: Some(id),
                event,
            } => serde_json::json!([TAG_EVENT, id, event]),
            Envelope::Event {
                subscription_id: None,
                event,
            } => serde_json::json!([TAG_EVENT, event]),
            Envelope::Other { tag } => serde_json::json!([tag]),
        };
        value.to_string()
    }
}

fn malformed(tag: &str, reason: &str) -> ProtocolError {
    ProtocolError::Malformed {
        tag: tag.to_string(),
        reason: reason.to_string(),
    }
}
