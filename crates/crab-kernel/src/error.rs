//! Kernel error types.
//!
//! Routing, timeout and middleware failures are delivered to the caller as
//! `Response.error` strings, so their `Display` output is the wire message.
//! Programming errors (double respond, double sweeper start, builder misuse)
//! are returned to the registering code instead.

use crab_types::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),

    #[error("unsupported event {event} on channel {channel}")]
    UnsupportedEvent { channel: String, event: String },

    #[error("no middleware registered for event {event} on channel {channel}")]
    NoMiddlewareRegistered { channel: String, event: String },

    /// The final middleware returned without responding.
    #[error("unresolved request {0}: middleware chain completed without a response")]
    UnresolvedRequest(RequestId),

    /// A middleware failed; the message is forwarded verbatim.
    #[error("{0}")]
    MiddlewareFailure(String),

    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout { request_id: RequestId, timeout_ms: u64 },

    #[error("request {0} is already in flight")]
    DuplicateRequestId(RequestId),

    #[error("invalid request: {0}")]
    InvalidPayload(String),

    /// A middleware tried to respond twice.
    #[error("request {0} was already resolved")]
    AlreadyResolved(RequestId),

    #[error("sweeper is already running")]
    SweeperAlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no tokio runtime available to drive the sweeper")]
    NoRuntime,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    CrossResolving(#[from] CrossResolvingError),
}

/// Misuse of the fluent registration builder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("handle({event}) must follow channel(..)")]
    HandleWithoutChannel { event: String },

    #[error("middleware on channel {channel} must follow handle(..)")]
    MiddlewareWithoutEvent { channel: String },
}

/// Failures of the suspend/resolve extension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrossResolvingError {
    #[error("cross-resolving request {resolve_id} timed out after {timeout_ms}ms")]
    Timeout { resolve_id: RequestId, timeout_ms: u64 },

    /// No entry under this id: never created, already settled, or expired.
    #[error("can not find context for cross-resolving {resolve_id}")]
    ContextMissing { resolve_id: RequestId },

    #[error("cross-resolving request is missing 'resolveId'")]
    MissingId,

    /// The originating request expired and took this entry with it.
    #[error("cross-resolving request {resolve_id} was cancelled")]
    Cancelled { resolve_id: RequestId },

    #[error("cross-resolving payload did not decode: {0}")]
    Decode(String),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
