//! Relay event model.
//!
//! An event's `id` is the lowercase hex SHA-256 of the compact JSON array
//! `[0, pubkey, created_at, kind, tags, content]`, and `sig` is the signature
//! over the raw id bytes made with the author's key.

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::METADATA_KIND;
use crate::error::EventError;
use crate::identity::{verify_signature, Identity};
use crate::types::IdentityKey;

/// A signed event as exchanged with relays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub pubkey: IdentityKey,
    /// Declared creation time (Unix seconds).
    pub created_at: u64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

/// An event that has not been signed yet.
#[derive(Debug, Clone)]
pub struct UnsignedEvent {
    pub pubkey: IdentityKey,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

fn event_id(
    pubkey: &IdentityKey,
    created_at: u64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    let canonical = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

impl UnsignedEvent {
    pub fn metadata(pubkey: IdentityKey, created_at: u64, content: String) -> Self {
        Self {
            pubkey,
            created_at,
            kind: METADATA_KIND,
            tags: Vec::new(),
            content,
        }
    }

    /// Compute the id and sign it with `identity`.
    ///
    /// The author is taken from the identity, overriding `pubkey`.
    pub fn sign(self, identity: &Identity) -> Event {
        let pubkey = identity.identity_key();
        let id = event_id(&pubkey, self.created_at, self.kind, &self.tags, &self.content);
        let id_bytes = hex::decode(&id).unwrap_or_default();
        let sig = hex::encode(identity.sign(&id_bytes).to_bytes());

        Event {
            id,
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

impl Event {
    pub fn compute_id(&self) -> String {
        event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    pub fn is_metadata(&self) -> bool {
        self.kind == METADATA_KIND
    }

    /// Check that the id matches the contents and the signature matches the author.
    pub fn verify(&self) -> Result<(), EventError> {
        if self.compute_id() != self.id {
            return Err(EventError::IdMismatch);
        }

        let id_bytes = hex::decode(&self.id).map_err(|_| EventError::IdMismatch)?;
        let sig_bytes: [u8; 64] = hex::decode(&self.sig)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(EventError::BadSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);

        verify_signature(&self.pubkey, &id_bytes, &signature).map_err(|_| EventError::BadSignature)
    }
}
