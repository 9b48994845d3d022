//! Outbound transport seam.
//!
//! A binding (extension port, `postMessage`, in-process queue, ...) delivers
//! requests one way and feeds replies back through
//! [`AsyncChannel::handle_incoming`](crate::AsyncChannel::handle_incoming).

use crate::error::TransportError;
use async_trait::async_trait;
use crab_types::Request;
use serde_json::Value;

/// One-way delivery of requests.
///
/// `push` is fire-and-forget: an `Ok` only means the message was handed to
/// the underlying channel, never that it was answered.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request` over the concrete channel.
    ///
    /// Bindings must override this; the default fails loudly.
    async fn push(&self, request: Request<Value>) -> Result<(), TransportError> {
        let _ = request;
        Err(TransportError::NotImplemented)
    }
}

/// A transport with no binding. Every `push` fails with `NotImplemented`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundTransport;

#[async_trait]
impl Transport for UnboundTransport {}

/// Plain closures act as transports.
#[async_trait]
impl<F> Transport for F
where
    F: Fn(Request<Value>) -> Result<(), TransportError> + Send + Sync,
{
    async fn push(&self, request: Request<Value>) -> Result<(), TransportError> {
        (self)(request)
    }
}
