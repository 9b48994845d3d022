//! Middlewares and the continuation chain that runs them.
//!
//! A pipeline is a linear list. The kernel calls the first middleware with
//! the request, the shared [`Responder`] and a [`Next`] pointing at the rest
//! of the list. Calling `next.run(request)` runs the remaining middlewares
//! with that (possibly modified) request; not calling it ends the chain.

use crate::error::KernelError;
use crate::responder::Responder;
use async_trait::async_trait;
use crab_types::{RawResponse, Request, RouteKey};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of a middleware body. Any error is turned into an error response.
pub type MiddlewareResult = anyhow::Result<()>;

/// A step in a channel/event pipeline.
///
/// Implemented for any `Fn(Request<E>, Responder, Option<Next<E>>) -> impl Future`,
/// so most middlewares are `async fn`s or closures wrapped in [`from_fn`]:
///
/// ```rust,ignore
/// async fn greet(_request: Request<Event>, respond: Responder, _next: Option<Next<Event>>) -> MiddlewareResult {
///     respond.respond(RawResponse::ok(json!({ "message": "hello" })))?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Middleware<E>: Send + Sync + 'static {
    async fn call(
        &self,
        request: Request<E>,
        respond: Responder,
        next: Option<Next<E>>,
    ) -> MiddlewareResult;
}

#[async_trait]
impl<E, F, Fut> Middleware<E> for F
where
    E: RouteKey,
    F: Fn(Request<E>, Responder, Option<Next<E>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    async fn call(
        &self,
        request: Request<E>,
        respond: Responder,
        next: Option<Next<E>>,
    ) -> MiddlewareResult {
        (self)(request, respond, next).await
    }
}

/// Pin a closure to the middleware signature.
///
/// Closures passed through here get their argument and return types from the
/// bound, so `?` and `Ok(())` inside the body need no annotations.
pub fn from_fn<E, F, Fut>(f: F) -> F
where
    E: RouteKey,
    F: Fn(Request<E>, Responder, Option<Next<E>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    f
}

/// Frozen, ordered middleware list for one (channel, event).
pub type Pipeline<E> = Arc<[Arc<dyn Middleware<E>>]>;

/// Continuation into the rest of a pipeline.
pub struct Next<E> {
    pipeline: Pipeline<E>,
    index: usize,
    responder: Responder,
}

impl<E: RouteKey> Next<E> {
    /// Run the remaining middlewares with `request`.
    ///
    /// Completes when the rest of the chain has finished (or suspended
    /// without calling its own `next`).
    pub async fn run(self, request: Request<E>) {
        advance(self.pipeline, self.index, request, self.responder).await
    }

    /// Number of middlewares still to run.
    pub fn remaining(&self) -> usize {
        self.pipeline.len() - self.index
    }
}

/// Run `pipeline[index]` and, through its `Next`, everything after it.
///
/// Failures are answered here: an `Err` or a panic from the middleware
/// becomes an error response unless the request was already answered, and
/// a final middleware that returns without responding yields
/// `UnresolvedRequest`.
pub(crate) fn advance<E: RouteKey>(
    pipeline: Pipeline<E>,
    index: usize,
    request: Request<E>,
    responder: Responder,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(middleware) = pipeline.get(index).cloned() else {
            return;
        };
        let is_last = index + 1 == pipeline.len();
        let next = (!is_last).then(|| Next {
            pipeline: Arc::clone(&pipeline),
            index: index + 1,
            responder: responder.clone(),
        });

        debug!(
            request_id = %responder.request_id(),
            position = index,
            "Running middleware"
        );

        let outcome = AssertUnwindSafe(middleware.call(request, responder.clone(), next))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                if is_last && !responder.is_resolved() {
                    let err = KernelError::UnresolvedRequest(responder.request_id().clone());
                    if responder.settle(RawResponse::error(err.to_string())) {
                        warn!(
                            request_id = %responder.request_id(),
                            "Pipeline finished without a response"
                        );
                    }
                }
            }
            Ok(Err(err)) => fail(&responder, &err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                fail(&responder, &anyhow::anyhow!(message));
            }
        }
    })
}

fn fail(responder: &Responder, err: &anyhow::Error) {
    let message = err.to_string();
    let failure = KernelError::MiddlewareFailure(message);
    if responder.settle(RawResponse::error(failure.to_string())) {
        warn!(
            request_id = %responder.request_id(),
            error = %err,
            "Middleware failed"
        );
        return;
    }

    // Already answered: the failure can't reach the caller any more.
    match err.downcast_ref::<KernelError>() {
        Some(KernelError::AlreadyResolved(_)) => error!(
            request_id = %responder.request_id(),
            "Middleware failed after responding twice"
        ),
        _ => debug!(
            request_id = %responder.request_id(),
            error = %err,
            "Swallowed middleware failure on resolved request"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "middleware panicked".to_string()
    }
}
