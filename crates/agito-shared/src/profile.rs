use serde::{Deserialize, Serialize};

use crate::constants::FALLBACK_DISPLAY_NAME;
use crate::error::EventError;
use crate::event::Event;
use crate::types::IdentityKey;

/// The nested content block of a metadata event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
}

/// Canonical profile of one actor, as held by the profile cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileRecord {
    pub identity_key: IdentityKey,
    pub name: Option<String>,
    pub display_name: String,
    /// Avatar URI.
    pub avatar: Option<String>,
    pub bio: Option<String>,
    /// Verified-address marker (`nip05`).
    pub verified_address: Option<String>,
    /// Declared creation time of the event this record came from (Unix seconds).
    pub last_updated: u64,
}

impl ProfileContent {
    pub fn from_json(content: &str) -> Result<Self, EventError> {
        serde_json::from_str(content).map_err(|e| EventError::ContentDecode(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // A struct of optional strings always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_record(record: &ProfileRecord) -> Self {
        Self {
            name: record.name.clone(),
            display_name: Some(record.display_name.clone()),
            picture: record.avatar.clone(),
            about: record.bio.clone(),
            nip05: record.verified_address.clone(),
        }
    }
}

impl ProfileRecord {
    /// Build a candidate record from a metadata event.
    ///
    /// Empty strings count as missing. The display name falls back to the
    /// name, then to a fixed placeholder.
    pub fn from_event(event: &Event) -> Result<Self, EventError> {
        if !event.is_metadata() {
            return Err(EventError::WrongKind(event.kind));
        }
        let content = ProfileContent::from_json(&event.content)?;
        Ok(Self::from_content(event.pubkey, event.created_at, content))
    }

    pub fn from_content(identity_key: IdentityKey, last_updated: u64, content: ProfileContent) -> Self {
        let name = non_empty(content.name);
        let display_name = non_empty(content.display_name);

        Self {
            identity_key,
            name: name.clone().or_else(|| display_name.clone()),
            display_name: display_name
                .or(name)
                .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string()),
            avatar: non_empty(content.picture),
            bio: non_empty(content.about),
            verified_address: non_empty(content.nip05),
            last_updated,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
