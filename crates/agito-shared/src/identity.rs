use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::constants::{NPUB_PREFIX, NSEC_PREFIX, SECRET_KEY_SIZE};
use crate::error::IdentityError;
use crate::types::IdentityKey;

/// An actor's cryptographic identity based on Ed25519.
/// The public key serves as the identity key.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("identity_key", &self.identity_key().short())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Restore identity from a 64-char hex secret
    pub fn from_secret_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes =
            hex::decode(s.trim()).map_err(|e| IdentityError::InvalidEncoding(e.to_string()))?;
        let secret: [u8; SECRET_KEY_SIZE] =
            bytes.try_into().map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Get the public identity key
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.signing_key.as_bytes()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.as_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Verify a signature against an identity key
pub fn verify_signature(
    key: &IdentityKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key = VerifyingKey::from_bytes(&key.0).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::SignatureInvalid)
}

/// A key decoded from user input.
#[derive(Debug, Clone)]
pub enum DecodedKey {
    Public(IdentityKey),
    Secret(Identity),
}

impl DecodedKey {
    pub fn identity_key(&self) -> IdentityKey {
        match self {
            DecodedKey::Public(key) => *key,
            DecodedKey::Secret(identity) => identity.identity_key(),
        }
    }
}

/// Decode a key in any of the accepted textual forms:
/// raw hex (public), `npub<hex>` (public) or `nsec<hex>` (secret).
/// A `1` or `_` separator after the prefix is tolerated.
pub fn decode_key(input: &str) -> Result<DecodedKey, IdentityError> {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix(NSEC_PREFIX) {
        return Identity::from_secret_hex(strip_separator(rest)).map(DecodedKey::Secret);
    }
    if let Some(rest) = input.strip_prefix(NPUB_PREFIX) {
        return IdentityKey::from_hex(strip_separator(rest)).map(DecodedKey::Public);
    }
    IdentityKey::from_hex(input).map(DecodedKey::Public)
}

/// Decode any accepted key form down to the public identity key.
pub fn resolve_identity_key(input: &str) -> Result<IdentityKey, IdentityError> {
    decode_key(input).map(|decoded| decoded.identity_key())
}

pub fn encode_npub(key: &IdentityKey) -> String {
    format!("{NPUB_PREFIX}1{}", key.to_hex())
}

pub fn encode_nsec(identity: &Identity) -> String {
    format!("{NSEC_PREFIX}1{}", identity.secret_hex())
}

// Only strip when what remains is exactly one key; a bare hex key may start with '1'.
fn strip_separator(rest: &str) -> &str {
    match rest.strip_prefix(&['1', '_'][..]) {
        Some(stripped) if stripped.len() == 2 * SECRET_KEY_SIZE => stripped,
        _ => rest,
    }
}
