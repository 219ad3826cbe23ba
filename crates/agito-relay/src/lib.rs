// Relay aggregation and profile reconciliation over WebSocket relays.

pub mod aggregator;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod connection;
pub mod endpoints;
pub mod error;
pub mod service;
pub mod subscribers;

pub use aggregator::{Aggregator, DiscardReason, FetchOutcome, IngestOutcome, Published};
pub use backoff::ReconnectPolicy;
pub use cache::{ProfileCache, Reconciled};
pub use config::AggregatorConfig;
pub use endpoints::{ConnectionState, EndpointStatus, EndpointTable};
pub use error::RelayError;
pub use service::{spawn_aggregator, AggregatorCommand, AggregatorHandle, Subscription};
pub use subscribers::{ProfileSubscriber, SubscriberId, SubscriberRegistry};
