use thiserror::Error;

/// Top-level error type for Courier.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Malformed chat or message identifier (e.g. a stringified-object
    /// artifact). Rejected before any store or provider call.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Session start flow failed (provider unreachable, challenge denied).
    /// Retried by the caller via `restart`, never auto-retried here.
    #[error("session start failed: {0}")]
    SessionStart(String),

    /// The provider deployment does not support the requested auth method.
    /// Terminal — report to the operator, do not retry.
    #[error("unsupported auth method: {0}")]
    UnsupportedAuthMethod(String),

    /// A control operation was invoked from a state that does not allow it.
    #[error("cannot {op} a session in state {from}")]
    InvalidTransition { from: String, op: &'static str },

    /// Error talking to the provider connector.
    #[error("connector error: {0}")]
    Connector(String),

    /// Message store error.
    #[error("store error: {0}")]
    Store(String),

    /// A webhook delivery that could not be accepted (bad signature,
    /// unusable payload).
    #[error("webhook rejected: {0}")]
    Webhook(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
