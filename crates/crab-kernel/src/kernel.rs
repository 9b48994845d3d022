//! The dispatch kernel.
//!
//! Routes each inbound request to its (channel, event) pipeline, guarantees a
//! single response per request, and answers requests that outlive their
//! declared timeout.

use crate::builder::KernelBuilder;
use crate::config::KernelConfig;
use crate::cross::{CrossResolver, CrossResolvingRequest};
use crate::error::{KernelError, KernelResult};
use crate::middleware::advance;
use crate::registry::Registry;
use crate::responder::{Deliver, Responder};
use crab_types::{RawResponse, Request, RequestId, Response, RouteKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A request currently running through a pipeline.
struct InFlightRequest {
    received_at: Instant,
    timeout: Duration,
    /// `channel/event`, for logs
    route: String,
    responder: Responder,
}

impl InFlightRequest {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.received_at) > self.timeout
    }
}

type InFlightTable = DashMap<RequestId, InFlightRequest>;

/// Receiver side of a Crab conversation.
///
/// Built by [`KernelBuilder`]; the registry is immutable afterwards. Cheap to
/// clone, and clones share all tables and the sweeper.
pub struct Kernel<C, E> {
    inner: Arc<KernelInner<C, E>>,
}

struct KernelInner<C, E> {
    registry: Registry<C, E>,
    in_flight: Arc<InFlightTable>,
    cross: CrossResolver,
    config: KernelConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<C, E> Drop for KernelInner<C, E> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl<C, E> Clone for Kernel<C, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: RouteKey, E: RouteKey> Kernel<C, E> {
    pub fn builder() -> KernelBuilder<C, E> {
        KernelBuilder::new()
    }

    pub(crate) fn new(registry: Registry<C, E>, cross: CrossResolver, config: KernelConfig) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                registry,
                in_flight: Arc::new(DashMap::new()),
                cross,
                config,
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Run `request` through the pipeline registered for `channel` and its
    /// event type.
    ///
    /// `respond` is called exactly once: with the pipeline's response, a
    /// routing error, `UnresolvedRequest`, a middleware failure, or
    /// `RequestTimeout` from the sweep. Completes when the pipeline has
    /// returned, which for a suspended pipeline may be long after it
    /// responded (or before, if it is waiting on cross-resolving).
    pub async fn execute<F>(&self, channel: &C, request: Request<E>, respond: F)
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let pipeline = match self.inner.registry.resolve(channel, &request.event_type) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                debug!(
                    request_id = %request.id,
                    channel = ?channel,
                    event = ?request.event_type,
                    error = %err,
                    "Routing miss"
                );
                respond(Response::failure(request.id, err.to_string()));
                return;
            }
        };

        let responder = match self.track(channel, &request, Box::new(respond)) {
            Ok(responder) => responder,
            Err(deliver) => {
                let err = KernelError::DuplicateRequestId(request.id.clone());
                warn!(request_id = %request.id, "Rejected duplicate in-flight request");
                deliver(Response::failure(request.id, err.to_string()));
                return;
            }
        };

        debug!(
            request_id = %request.id,
            channel = ?channel,
            event = ?request.event_type,
            middlewares = pipeline.len(),
            "Executing request"
        );

        advance(pipeline, 0, request, responder).await;
    }

    /// Like [`execute`](Self::execute), for untyped messages.
    ///
    /// A message that does not decode as a request is answered with
    /// `InvalidPayload`, addressed to its `id` when it has one.
    pub async fn execute_value<F>(&self, channel: &C, message: Value, respond: F)
    where
        E: DeserializeOwned,
        F: FnOnce(Response) + Send + 'static,
    {
        let id = message
            .get("id")
            .and_then(Value::as_str)
            .map(RequestId::new)
            .unwrap_or_else(|| RequestId::new(""));

        match serde_json::from_value::<Request<E>>(message) {
            Ok(request) => self.execute(channel, request, respond).await,
            Err(e) => {
                let err = KernelError::InvalidPayload(e.to_string());
                warn!(request_id = %id, error = %err, "Rejected undecodable request");
                respond(Response::failure(id, err.to_string()));
            }
        }
    }

    /// Spawn [`execute`](Self::execute) onto the runtime.
    ///
    /// Transports call this from their receive loop so a suspended pipeline
    /// never blocks delivery of the message that would resume it.
    pub fn dispatch<F>(&self, channel: C, request: Request<E>, respond: F) -> JoinHandle<()>
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let kernel = self.clone();
        tokio::spawn(async move { kernel.execute(&channel, request, respond).await })
    }

    /// Register `request` as in flight and build its responder.
    ///
    /// Hands `deliver` back if the id is already in flight.
    fn track(&self, channel: &C, request: &Request<E>, deliver: Deliver) -> Result<Responder, Deliver> {
        match self.inner.in_flight.entry(request.id.clone()) {
            Entry::Occupied(_) => Err(deliver),
            Entry::Vacant(slot) => {
                let table = Arc::downgrade(&self.inner.in_flight);
                let request_id = request.id.clone();
                let responder = Responder::tracked(request.id.clone(), deliver, move || {
                    if let Some(table) = table.upgrade() {
                        table.remove(&request_id);
                    }
                });

                slot.insert(InFlightRequest {
                    received_at: Instant::now(),
                    timeout: request.timeout(),
                    route: format!("{channel:?}/{:?}", request.event_type),
                    responder: responder.clone(),
                });
                Ok(responder)
            }
        }
    }

    /// Start the periodic in-flight sweep.
    pub fn start_sweeper(&self, interval: Duration) -> KernelResult<()> {
        if interval.is_zero() {
            return Err(KernelError::Config("sweep interval cannot be 0".into()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| KernelError::NoRuntime)?;

        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return Err(KernelError::SweeperAlreadyRunning);
        }
        *sweeper = Some(runtime.spawn(sweep_task(
            Arc::clone(&self.inner.in_flight),
            self.inner.cross.clone(),
            interval,
        )));

        debug!(interval_ms = interval.as_millis(), "Kernel sweeper started");
        Ok(())
    }

    /// Stop the sweep. Returns false if it was not running.
    pub fn stop_sweeper(&self) -> bool {
        match self.inner.sweeper.lock().take() {
            Some(handle) => {
                handle.abort();
                debug!("Kernel sweeper stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner.sweeper.lock().is_some()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn is_in_flight(&self, request_id: &RequestId) -> bool {
        self.inner.in_flight.contains_key(request_id)
    }

    pub fn middleware_count(&self, channel: &C, event: &E) -> usize {
        self.inner.registry.middleware_count(channel, event)
    }

    pub fn has_channel(&self, channel: &C) -> bool {
        self.inner.registry.has_channel(channel)
    }

    pub fn has_event(&self, channel: &C, event: &E) -> bool {
        self.inner.registry.has_event(channel, event)
    }

    pub fn cross_resolver(&self) -> &CrossResolver {
        &self.inner.cross
    }

    /// Suspend on behalf of `originating_request_id` until another pipeline
    /// answers. See [`CrossResolver::create`].
    pub fn create_cross_resolving_request(
        &self,
        originating_request_id: RequestId,
        timeout: Option<Duration>,
    ) -> CrossResolvingRequest {
        let timeout = timeout.unwrap_or_else(|| self.inner.cross.default_timeout());
        self.inner.cross.create(originating_request_id, timeout)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }
}

/// Answer in-flight requests older than their timeout and cancel their
/// cross-resolving entries. Returns how many were answered.
fn sweep_expired(in_flight: &InFlightTable, cross: &CrossResolver) -> usize {
    let now = Instant::now();
    let expired: Vec<RequestId> = in_flight
        .iter()
        .filter(|entry| entry.is_expired(now))
        .map(|entry| entry.key().clone())
        .collect();

    let mut answered = 0;
    for request_id in expired {
        // Re-check under the shard lock; the request may have just responded
        let Some((_, entry)) = in_flight.remove_if(&request_id, |_, entry| entry.is_expired(now))
        else {
            continue;
        };

        let err = KernelError::RequestTimeout {
            request_id: request_id.clone(),
            timeout_ms: u64::try_from(entry.timeout.as_millis()).unwrap_or(u64::MAX),
        };
        if entry.responder.settle(RawResponse::error(err.to_string())) {
            warn!(
                request_id = %request_id,
                route = %entry.route,
                timeout_ms = entry.timeout.as_millis(),
                "In-flight request timed out"
            );
            answered += 1;
        }
        cross.cancel_originating(&request_id);
    }
    answered
}

async fn sweep_task(in_flight: Arc<InFlightTable>, cross: CrossResolver, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let answered = sweep_expired(&in_flight, &cross);
        if answered > 0 {
            debug!(answered = answered, "Swept expired in-flight requests");
        }
    }
}
