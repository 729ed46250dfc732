//! Error handling - connectivity error taxonomy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Connectivity-core error hierarchy.
///
/// Transport and sequence errors are recovered inside their owning component
/// and never cross the component boundary; authentication and persistent
/// reconnect failures surface as a degraded connectivity signal.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/IO errors (REST)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Socket-level failures - retried with backoff
    #[error("Transport error: {0}")]
    Transport(String),

    /// Signing or credential rejection - fatal to the session, no silent retry
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Malformed or unrecognized frame - logged, frame dropped
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Book diff sequence gap - triggers resync
    #[error("Sequence gap for {pair}: book at {current}, diff at {received}")]
    SequenceGap {
        pair: String,
        current: u64,
        received: u64,
    },

    /// Event references an order/instrument we do not track
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// REST rate limit - retried honoring the venue's hint when present
    #[error("Rate limited (retry hint: {retry_after_ms:?} ms)")]
    RateLimit { retry_after_ms: Option<u64> },

    /// Send attempted while the session is not Ready
    #[error("Session not connected")]
    NotConnected,

    /// Trading rules not loaded yet - order submission is gated
    #[error("Trading rules not ready")]
    NotReady,

    /// Order violates the instrument's trading rules
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Exchange-reported API errors
    #[error("Exchange error: {0}")]
    Exchange(String),
}
