use thiserror::Error;

/// Transport-level failure. Recoverable: drives the reconnect state machine
/// and is never surfaced to callers as anything but connection-state events.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Failure of a single connect attempt as reported by the transport.
#[derive(Debug, Error)]
pub enum ConnectFailure {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Error returned to the caller of `connect`. Network-level failures are not
/// represented here; they feed the reconnect cycle instead.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("authentication rejected by server: {reason}")]
    AuthRejected { reason: String },
}

/// Per-message send failure. Scoped to the originating message; never aborts
/// the session.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected to the messaging server")]
    NotConnected,
    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("no message with temp id {0} is awaiting retry")]
    NothingToRetry(String),
}
