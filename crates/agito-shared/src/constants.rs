/// Application name
pub const APP_NAME: &str = "Agito";

/// Event kind carrying profile metadata
pub const METADATA_KIND: u32 = 0;

/// Relays dialed when no explicit list is configured
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.snort.social",
    "wss://purplepag.es",
    "wss://relay.nostr.band",
];

/// Result count of the standing metadata query issued when a relay opens
pub const DEFAULT_INIT_LIMIT: usize = 50;

/// Result count of a targeted single-profile query
pub const PROFILE_QUERY_LIMIT: usize = 1;

/// Subscription id prefixes
pub const INIT_SUBSCRIPTION_PREFIX: &str = "init-";
pub const PROFILE_SUBSCRIPTION_PREFIX: &str = "p-";

/// Display name used when a profile carries neither `display_name` nor `name`
pub const FALLBACK_DISPLAY_NAME: &str = "Anon";

/// Identity key size in bytes (Ed25519 public key)
pub const IDENTITY_KEY_SIZE: usize = 32;

/// Secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Textual key prefixes
pub const NPUB_PREFIX: &str = "npub";
pub const NSEC_PREFIX: &str = "nsec";

/// Reconnection backoff bounds in seconds
pub const RECONNECT_BASE_SECS: u64 = 5;
pub const RECONNECT_MAX_SECS: u64 = 300;

/// Capacity of the aggregator command channel
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;
