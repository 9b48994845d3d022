//! Client correlator.
//!
//! Turns a one-way push [`Transport`] into an awaitable request/response API.
//! Replies are matched purely by request id, so a transport may reconnect
//! underneath without losing pending entries.

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::pending::{sweep_task, PendingRequestStore, PendingStats};
use crate::transport::Transport;
use crab_types::{Request, RequestId, Response};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Caller side of a Crab conversation.
///
/// Cheap to clone; clones share the pending table and the sweeper. The
/// sweeper stops when the last clone is dropped.
#[derive(Clone)]
pub struct AsyncChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    store: Arc<PendingRequestStore>,
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl AsyncChannel {
    /// Create a channel with default configuration and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: impl Transport + 'static) -> ChannelResult<Self> {
        Self::with_config(transport, ChannelConfig::default())
    }

    pub fn with_config(
        transport: impl Transport + 'static,
        config: ChannelConfig,
    ) -> ChannelResult<Self> {
        Self::from_shared(Arc::new(transport), config)
    }

    /// Create a channel over a transport that is shared with other owners.
    pub fn from_shared(transport: Arc<dyn Transport>, config: ChannelConfig) -> ChannelResult<Self> {
        config.validate()?;
        let channel = Self {
            inner: Arc::new(ChannelInner {
                store: Arc::new(PendingRequestStore::new()),
                transport,
                config,
                sweeper: Mutex::new(None),
            }),
        };
        channel.start_sweeper(channel.inner.config.sweep_interval())?;
        Ok(channel)
    }

    /// Send `payload` with the configured default timeout.
    pub async fn request<P: Serialize>(&self, payload: P) -> ChannelResult<Response> {
        self.request_with_timeout(payload, self.inner.config.default_timeout())
            .await
    }

    /// Send `payload` and wait for the correlated response.
    ///
    /// `payload` must serialize to a JSON object with a `type` field. An `id`
    /// field, when present, must be a string not currently pending; without
    /// one a fresh id is assigned. `timeout` is stamped onto the request.
    ///
    /// Settles exactly once: with the response, with `Remote` when the
    /// response carries `error`, or with `RequestTimeout` from the sweep.
    pub async fn request_with_timeout<P: Serialize>(
        &self,
        payload: P,
        timeout: Duration,
    ) -> ChannelResult<Response> {
        let request = build_request(payload, timeout)?;
        let request_id = request.id.clone();

        let rx = self.inner.store.register(request.clone(), timeout)?;

        if let Err(e) = self.inner.transport.push(request).await {
            // Nothing was delivered, so nothing will ever answer
            self.inner.store.cancel(&request_id);
            warn!(request_id = %request_id, error = %e, "Transport push failed");
            return Err(ChannelError::Transport(e));
        }

        debug!(
            request_id = %request_id,
            timeout_ms = timeout.as_millis(),
            "Pushed request"
        );

        match rx.await {
            Ok(settlement) => settlement,
            Err(_) => Err(ChannelError::Closed(request_id)),
        }
    }

    /// Match an inbound response to its pending request.
    ///
    /// Unmatched responses are ignored: they legitimately arrive after a
    /// timeout has already settled the request.
    pub fn handle_incoming(&self, response: Response) {
        self.inner.store.complete(response);
    }

    /// Like [`handle_incoming`](Self::handle_incoming), for untyped messages.
    ///
    /// Messages that are not responses are ignored.
    pub fn handle_incoming_value(&self, message: Value) {
        match serde_json::from_value::<Response>(message) {
            Ok(response) => self.handle_incoming(response),
            Err(e) => debug!(error = %e, "Ignoring message that is not a response"),
        }
    }

    /// Start the periodic timeout sweep.
    ///
    /// Fails with `SweeperAlreadyRunning` if a sweep is active.
    pub fn start_sweeper(&self, interval: Duration) -> ChannelResult<()> {
        if interval.is_zero() {
            return Err(ChannelError::Config("sweep interval cannot be 0".into()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return Err(ChannelError::SweeperAlreadyRunning);
        }
        *sweeper = Some(runtime.spawn(sweep_task(Arc::clone(&self.inner.store), interval)));

        debug!(interval_ms = interval.as_millis(), "Channel sweeper started");
        Ok(())
    }

    /// Stop the sweep. Returns false if it was not running.
    ///
    /// Pending requests are left in place and will only settle through
    /// `handle_incoming` until the sweeper is started again.
    pub fn stop_sweeper(&self) -> bool {
        match self.inner.sweeper.lock().take() {
            Some(handle) => {
                handle.abort();
                debug!("Channel sweeper stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner.sweeper.lock().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.store.pending_count()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.inner.store.is_pending(request_id)
    }

    /// The request as pushed, while it is still pending.
    pub fn pending_request(&self, request_id: &RequestId) -> Option<Request<Value>> {
        self.inner.store.payload(request_id)
    }

    pub fn stats(&self) -> &PendingStats {
        self.inner.store.stats()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }
}

/// Validate a caller payload and turn it into a wire request.
fn build_request<P: Serialize>(payload: P, timeout: Duration) -> ChannelResult<Request<Value>> {
    let value = serde_json::to_value(payload)
        .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(ChannelError::InvalidPayload(
            "payload must be an object".into(),
        ));
    };

    let id = match fields.remove("id") {
        None | Some(Value::Null) => RequestId::generate(),
        Some(Value::String(id)) => RequestId::new(id),
        Some(other) => {
            return Err(ChannelError::InvalidPayload(format!(
                "id must be a string, got {other}"
            )))
        }
    };

    let event_type = fields
        .remove("type")
        .ok_or_else(|| ChannelError::InvalidPayload("missing 'type' field".into()))?;

    // Overwritten by the stamped deadline
    fields.remove("timeout");
    let context = fields.remove("context").filter(|c| !c.is_null());

    Ok(Request {
        id,
        event_type,
        timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        context,
        payload: fields,
    })
}
