use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RelayError {
    /// The aggregator task has shut down.
    #[error("Aggregator is not running")]
    Stopped,

    /// The aggregator dropped a request without answering it.
    #[error("Aggregator dropped the reply")]
    NoReply,

    /// The cached profile already carries the largest possible timestamp,
    /// so no newer metadata can be published for it.
    #[error("Cached profile timestamp cannot be superseded")]
    TimestampExhausted,
}
