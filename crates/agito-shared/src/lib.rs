// Identity, metadata events and the relay wire envelope shared by every agito crate.

pub mod constants;
pub mod error;
pub mod event;
pub mod identity;
pub mod profile;
pub mod protocol;
pub mod types;

pub use error::{AgitoError, EventError, IdentityError, ProtocolError};
pub use event::{Event, UnsignedEvent};
pub use identity::{decode_key, resolve_identity_key, DecodedKey, Identity};
pub use profile::{ProfileContent, ProfileRecord};
pub use protocol::{Envelope, Filter};
pub use types::IdentityKey;
