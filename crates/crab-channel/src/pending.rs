//! Pending request store.
//!
//! Maps request ids to callers waiting on a response.
//!
//! Flow:
//! 1. `AsyncChannel::request` calls `register()` and gets a oneshot receiver
//! 2. The request is pushed over the transport
//! 3. The transport hands the reply to `complete()`, or the sweep calls
//!    `remove_expired()` once the deadline has passed
//! 4. The caller's receiver yields exactly one outcome
//!
//! Every terminal path starts by removing the entry from the map. Whoever
//! removes it settles it; a racing path finds nothing and does nothing.

use crate::error::ChannelError;
use crab_types::{Request, RequestId, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outcome delivered to a waiting caller.
pub type Settlement = Result<Response, ChannelError>;

/// A request waiting for its response
struct PendingRequest {
    /// Channel to settle the caller
    sender: oneshot::Sender<Settlement>,
    /// The request as it was pushed
    payload: Request<Value>,
    /// When the request was registered
    sent_at: Instant,
    timeout: Duration,
}

/// Statistics for the pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests resolved with a success response
    pub total_completed: AtomicU64,
    /// Total requests rejected by an error response
    pub total_failed: AtomicU64,
    /// Total requests timed out by the sweep
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled or abandoned by their caller
    pub total_cancelled: AtomicU64,
}

pub struct PendingRequestStore {
    pending: DashMap<RequestId, PendingRequest>,
    stats: Arc<PendingStats>,
}

impl PendingRequestStore {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a pending request and get a receiver for its outcome.
    ///
    /// Fails with `DuplicateRequestId` if the id is already pending.
    pub fn register(
        &self,
        payload: Request<Value>,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Settlement>, ChannelError> {
        let request_id = payload.id.clone();
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(request_id.clone()) {
            Entry::Occupied(_) => {
                warn!(request_id = %request_id, "Rejected duplicate request id");
                return Err(ChannelError::DuplicateRequestId(request_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    sender: tx,
                    payload,
                    sent_at: Instant::now(),
                    timeout,
                });
            }
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            request_id = %request_id,
            timeout_ms = timeout.as_millis(),
            "Registered pending request"
        );

        Ok(rx)
    }

    /// Settle a pending request with a response.
    ///
    /// Responses carrying `error` reject the caller; others resolve it with
    /// the full response. Returns false if nothing was pending under
    /// `response.request_id` (late reply after a timeout, or a stray message).
    pub fn complete(&self, response: Response) -> bool {
        let Some((request_id, pending)) = self.pending.remove(&response.request_id) else {
            debug!(
                request_id = %response.request_id,
                "Ignoring response for unknown or expired request"
            );
            return false;
        };

        let response_time = pending.sent_at.elapsed();
        let settlement = if let Some(message) = response.error.clone() {
            self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
            Err(ChannelError::Remote(message))
        } else {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            Ok(response)
        };

        if pending.sender.send(settlement).is_err() {
            // Caller dropped its future
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            request_id = %request_id,
            event_type = %pending.payload.event_type,
            response_time_ms = response_time.as_millis(),
            "Completed pending request"
        );
        true
    }

    /// Reject every request whose deadline has passed.
    ///
    /// Returns the number of requests timed out.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.sent_at) > entry.timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for request_id in expired {
            // Re-check under the shard lock; a response may have won the race.
            let Some((request_id, pending)) = self
                .pending
                .remove_if(&request_id, |_, p| now.duration_since(p.sent_at) > p.timeout)
            else {
                continue;
            };

            let timeout_ms = u64::try_from(pending.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(
                request_id = %request_id,
                event_type = %pending.payload.event_type,
                elapsed_ms = now.duration_since(pending.sent_at).as_millis(),
                timeout_ms = timeout_ms,
                "Removing expired pending request"
            );
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            let _ = pending.sender.send(Err(ChannelError::RequestTimeout {
                request_id,
                timeout_ms,
            }));
            removed += 1;
        }

        removed
    }

    /// Drop a pending request without settling it.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        if self.pending.remove(request_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.pending.contains_key(request_id)
    }

    /// The request registered under `request_id`, if still pending.
    pub fn payload(&self, request_id: &RequestId) -> Option<Request<Value>> {
        self.pending.get(request_id).map(|p| p.payload.clone())
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for PendingRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that times out expired requests on every tick.
pub async fn sweep_task(store: Arc<PendingRequestStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let removed = store.remove_expired();
        if removed > 0 {
            debug!(removed = removed, "Swept expired pending requests");
        }
    }
}
