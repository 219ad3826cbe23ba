use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgitoError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("Signature verification failed")]
    SignatureInvalid,
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Not a metadata event (kind {0})")]
    WrongKind(u32),

    #[error("Content block could not be decoded: {0}")]
    ContentDecode(String),

    #[error("Event id does not match its contents")]
    IdMismatch,

    #[error("Event signature is invalid")]
    BadSignature,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Envelope is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Envelope is not a JSON array")]
    NotAnArray,

    #[error("Envelope has no message-type tag")]
    MissingTag,

    #[error("Malformed {tag} envelope: {reason}")]
    Malformed { tag: String, reason: String },
}
