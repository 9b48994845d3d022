//! Respond-once guard.
//!
//! Every request executed by the kernel gets exactly one [`Responder`]. All
//! clones share one slot holding the transport callback; the first
//! `respond` takes it, the rest see an empty slot.

use crate::error::KernelError;
use crab_types::{RawResponse, RequestId, Response};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

pub(crate) type Deliver = Box<dyn FnOnce(Response) + Send>;
type Release = Box<dyn FnOnce() + Send>;

struct Slot {
    deliver: Deliver,
    /// Drops the kernel's in-flight entry
    release: Option<Release>,
}

/// Callback handed to middlewares for answering a request.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<ResponderInner>,
}

struct ResponderInner {
    request_id: RequestId,
    slot: Mutex<Option<Slot>>,
}

impl Responder {
    /// A responder not tracked by any kernel.
    ///
    /// Useful for exercising a middleware on its own.
    pub fn new<F>(request_id: RequestId, deliver: F) -> Self
    where
        F: FnOnce(Response) + Send + 'static,
    {
        Self::build(request_id, Box::new(deliver), None)
    }

    pub(crate) fn tracked<R>(request_id: RequestId, deliver: Deliver, release: R) -> Self
    where
        R: FnOnce() + Send + 'static,
    {
        Self::build(request_id, deliver, Some(Box::new(release)))
    }

    fn build(request_id: RequestId, deliver: Deliver, release: Option<Release>) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                request_id,
                slot: Mutex::new(Some(Slot { deliver, release })),
            }),
        }
    }

    /// Answer the request.
    ///
    /// Stamps `requestId` onto `response` and forwards it. A second call for
    /// the same request is a bug in the calling middleware: it returns
    /// `AlreadyResolved` and the first response stands.
    pub fn respond(&self, response: RawResponse) -> Result<(), KernelError> {
        if self.settle(response) {
            Ok(())
        } else {
            error!(
                request_id = %self.inner.request_id,
                "Middleware responded to an already resolved request"
            );
            Err(KernelError::AlreadyResolved(self.inner.request_id.clone()))
        }
    }

    /// Shorthand for `respond(RawResponse::error(message))`.
    pub fn reject(&self, message: impl Into<String>) -> Result<(), KernelError> {
        self.respond(RawResponse::error(message))
    }

    /// Answer if nobody has yet. Returns whether this call delivered.
    pub(crate) fn settle(&self, response: RawResponse) -> bool {
        let Some(slot) = self.inner.slot.lock().take() else {
            return false;
        };

        if let Some(release) = slot.release {
            release();
        }

        let response = response.into_response(self.inner.request_id.clone());
        debug!(
            request_id = %self.inner.request_id,
            is_error = response.is_error(),
            "Responding"
        );
        (slot.deliver)(response);
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.slot.lock().is_none()
    }

    pub fn request_id(&self) -> &RequestId {
        &self.inner.request_id
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("request_id", &self.inner.request_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
