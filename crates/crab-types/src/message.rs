//! Request and response envelopes.
//!
//! ```text
//! Request  = { id, type, timeout, context?, ...payload }
//! Response = { requestId, error?, ...payload }
//! ```
//!
//! Freeform payload fields sit next to the envelope fields on the wire, so
//! both envelopes flatten a JSON object map into themselves.

use crate::id::RequestId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Default request timeout in milliseconds, stamped when the caller gives none.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

const RESPONSE_ID_FIELD: &str = "requestId";
const RESPONSE_ERROR_FIELD: &str = "error";

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// A routed request.
///
/// `E` is the event type discriminator (a string, an integer, or a serde
/// enum). Correlators that never inspect it use `Request<Value>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<E = String> {
    pub id: RequestId,

    /// Event type selecting the pipeline within a channel.
    #[serde(rename = "type")]
    pub event_type: E,

    /// Advisory deadline in milliseconds. Every hop may apply it.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Source context attached by the receiving transport (e.g. the sender
    /// of an extension port message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl<E> Request<E> {
    pub fn new(id: impl Into<RequestId>, event_type: E) -> Self {
        Self {
            id: id.into(),
            event_type,
            timeout: DEFAULT_TIMEOUT_MS,
            context: None,
            payload: Map::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Set a payload field, returning the modified request.
    ///
    /// This is how a middleware derives a request to hand to `next`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Deserialize the freeform payload fields into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// What a middleware hands to `respond`: `{ error?, ...payload }`.
///
/// The kernel turns it into a [`Response`] by stamping the request id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawResponse {
    /// An empty success (plain acknowledgement).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A success carrying `payload`.
    ///
    /// Object payloads are flattened into the response; any other JSON value
    /// is carried under a `data` field.
    pub fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Self {
            error: None,
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Stamp `request_id` onto the response.
    ///
    /// Payload keys that shadow the envelope fields are dropped; the typed
    /// fields are the only source of `requestId` and `error` on the wire.
    pub fn into_response(self, request_id: RequestId) -> Response {
        let mut payload = self.payload;
        payload.remove(RESPONSE_ID_FIELD);
        payload.remove(RESPONSE_ERROR_FIELD);
        Response {
            request_id,
            error: self.error,
            payload,
        }
    }
}

/// A reply correlated to a request by `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,

    /// Presence signals failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Response {
    pub fn new(request_id: impl Into<RequestId>) -> Self {
        Self {
            request_id: request_id.into(),
            error: None,
            payload: Map::new(),
        }
    }

    pub fn failure(request_id: impl Into<RequestId>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            error: Some(error.into()),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Deserialize the payload fields (everything except `requestId` and
    /// `error`) into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}
