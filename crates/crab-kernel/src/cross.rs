//! Cross-resolving: suspend one pipeline until another one answers it.
//!
//! ```text
//! pipeline A: create(req.id) ─▶ resolve_id ─▶ (ask someone) ─▶ resolve().await ──▶ next / reject
//!                                   │                                  ▲
//! pipeline B:  { resolveId, ... } ──┴──▶ CrossResolver::middleware ────┘
//! ```
//!
//! Entries are registered when the handle is created and removed when it
//! settles, times out, is dropped, or when the originating request is swept.

use crate::error::CrossResolvingError;
use crate::middleware::{from_fn, Middleware, Next};
use crate::responder::Responder;
use crab_types::{RawResponse, Request, RequestId, RouteKey};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Field carrying the resolve id on a resolving request.
pub const RESOLVE_ID_FIELD: &str = "resolveId";

type Resolution = Map<String, Value>;

struct CrossEntry {
    originating_request_id: RequestId,
    sender: oneshot::Sender<Resolution>,
    created_at: Instant,
}

struct CrossTable {
    entries: DashMap<RequestId, CrossEntry>,
    default_timeout: Duration,
}

/// The kernel's table of suspended cross-resolving requests.
///
/// Cheap to clone. Obtain it from [`KernelBuilder::cross_resolver`](crate::KernelBuilder::cross_resolver)
/// to capture it in middlewares before the kernel is built.
#[derive(Clone)]
pub struct CrossResolver {
    table: Arc<CrossTable>,
}

impl CrossResolver {
    pub(crate) fn new(default_timeout: Duration) -> Self {
        Self {
            table: Arc::new(CrossTable {
                entries: DashMap::new(),
                default_timeout,
            }),
        }
    }

    /// Open a cross-resolving request on behalf of `originating_request_id`.
    pub fn create(
        &self,
        originating_request_id: RequestId,
        timeout: Duration,
    ) -> CrossResolvingRequest {
        let resolve_id = RequestId::generate();
        let (sender, receiver) = oneshot::channel();

        self.table.entries.insert(
            resolve_id.clone(),
            CrossEntry {
                originating_request_id: originating_request_id.clone(),
                sender,
                created_at: Instant::now(),
            },
        );

        debug!(
            resolve_id = %resolve_id,
            originating_request_id = %originating_request_id,
            timeout_ms = timeout.as_millis(),
            "Created cross-resolving request"
        );

        CrossResolvingRequest {
            resolve_id,
            receiver,
            timeout,
            table: Arc::clone(&self.table),
        }
    }

    /// [`create`](Self::create) with the configured default timeout.
    pub fn create_default(&self, originating_request_id: RequestId) -> CrossResolvingRequest {
        self.create(originating_request_id, self.table.default_timeout)
    }

    /// Middleware that answers suspended requests.
    ///
    /// Register it on whichever (channel, event) carries resolutions. It
    /// reads `resolveId`, hands every other payload field to the waiting
    /// request and acknowledges with an empty response. A missing id or an
    /// unknown entry is answered with an error.
    pub fn middleware<E: RouteKey>(&self) -> impl Middleware<E> {
        let resolver = self.clone();
        from_fn(
            move |request: Request<E>, respond: Responder, _next: Option<Next<E>>| {
                let outcome = resolver.fulfil(request.payload);
                async move {
                    match outcome {
                        Ok(()) => respond.respond(RawResponse::empty())?,
                        Err(err) => {
                            warn!(error = %err, "Cross-resolving failed");
                            respond.reject(err.to_string())?
                        }
                    }
                    Ok(())
                }
            },
        )
    }

    /// Deliver `payload` to the entry named by its `resolveId` field.
    pub fn fulfil(&self, mut payload: Map<String, Value>) -> Result<(), CrossResolvingError> {
        let resolve_id = match payload.remove(RESOLVE_ID_FIELD) {
            Some(Value::String(id)) => RequestId::new(id),
            _ => return Err(CrossResolvingError::MissingId),
        };

        let Some((_, entry)) = self.table.entries.remove(&resolve_id) else {
            return Err(CrossResolvingError::ContextMissing { resolve_id });
        };

        debug!(
            resolve_id = %resolve_id,
            originating_request_id = %entry.originating_request_id,
            waited_ms = entry.created_at.elapsed().as_millis(),
            "Cross-resolving request fulfilled"
        );

        if entry.sender.send(payload).is_err() {
            debug!(resolve_id = %resolve_id, "Cross-resolving waiter already gone");
        }
        Ok(())
    }

    /// Drop every entry opened on behalf of `originating_request_id`.
    ///
    /// Their waiters fail with `Cancelled`.
    pub(crate) fn cancel_originating(&self, originating_request_id: &RequestId) -> usize {
        let ids: Vec<RequestId> = self
            .table
            .entries
            .iter()
            .filter(|entry| &entry.originating_request_id == originating_request_id)
            .map(|entry| entry.key().clone())
            .collect();

        let cancelled = ids
            .iter()
            .filter(|id| self.table.entries.remove(*id).is_some())
            .count();

        if cancelled > 0 {
            debug!(
                originating_request_id = %originating_request_id,
                cancelled,
                "Cancelled cross-resolving requests of expired request"
            );
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.table.entries.len()
    }

    pub fn is_pending(&self, resolve_id: &RequestId) -> bool {
        self.table.entries.contains_key(resolve_id)
    }

    pub fn default_timeout(&self) -> Duration {
        self.table.default_timeout
    }
}

/// Handle on one suspended request.
///
/// Send [`resolve_id`](Self::resolve_id) to whoever will answer, then await
/// [`resolve`](Self::resolve). Dropping the handle withdraws the entry.
pub struct CrossResolvingRequest {
    resolve_id: RequestId,
    receiver: oneshot::Receiver<Resolution>,
    timeout: Duration,
    table: Arc<CrossTable>,
}

impl CrossResolvingRequest {
    pub fn resolve_id(&self) -> &RequestId {
        &self.resolve_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the resolution and decode its fields into `T`.
    pub async fn resolve<T: DeserializeOwned>(mut self) -> Result<T, CrossResolvingError> {
        let payload = match tokio::time::timeout(self.timeout, &mut self.receiver).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => {
                return Err(CrossResolvingError::Cancelled {
                    resolve_id: self.resolve_id.clone(),
                })
            }
            Err(_) => {
                if self.table.entries.remove(&self.resolve_id).is_some() {
                    debug!(resolve_id = %self.resolve_id, "Cross-resolving request timed out");
                    return Err(self.timed_out());
                }
                // Settled right at the deadline
                match self.receiver.try_recv() {
                    Ok(payload) => payload,
                    Err(_) => return Err(self.timed_out()),
                }
            }
        };

        serde_json::from_value(Value::Object(payload))
            .map_err(|e| CrossResolvingError::Decode(e.to_string()))
    }

    fn timed_out(&self) -> CrossResolvingError {
        CrossResolvingError::Timeout {
            resolve_id: self.resolve_id.clone(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Drop for CrossResolvingRequest {
    fn drop(&mut self) {
        self.table.entries.remove(&self.resolve_id);
    }
}

impl std::fmt::Debug for CrossResolvingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossResolvingRequest")
            .field("resolve_id", &self.resolve_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}
