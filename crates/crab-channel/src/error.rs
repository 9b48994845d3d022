//! Caller-side error types.

use crab_types::RequestId;

/// Errors surfaced by a [`Transport`](crate::Transport) binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The binding did not provide a `push` implementation.
    #[error("push is not implemented for this transport")]
    NotImplemented,

    /// The underlying connection is gone.
    #[error("transport closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Outcome of a failed [`AsyncChannel::request`](crate::AsyncChannel::request).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Payload is not a keyed structure, lacks `type`, or has a non-string `id`.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The caller reused an id that is still pending.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    /// No matching response arrived before the deadline.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout { request_id: RequestId, timeout_ms: u64 },

    /// The remote side answered with `error`; the message is forwarded verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("sweeper is already running")]
    SweeperAlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),

    /// Construction happened outside a tokio runtime.
    #[error("no tokio runtime available to drive the sweeper")]
    NoRuntime,

    /// The pending entry was dropped without being settled.
    #[error("channel closed before request {0} settled")]
    Closed(RequestId),
}

impl ChannelError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::RequestTimeout { .. })
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
