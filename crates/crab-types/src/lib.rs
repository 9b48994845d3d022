//! # Crab Types
//!
//! Wire shapes shared by both ends of a Crab conversation:
//!
//! ```text
//! ┌──────────────┐   Request { id, type, timeout, ... }   ┌──────────────┐
//! │ AsyncChannel │ ─────────────────────────────────────▶ │    Kernel    │
//! │  (caller)    │ ◀───────────────────────────────────── │  (receiver)  │
//! └──────────────┘   Response { requestId, error?, ... }  └──────────────┘
//! ```
//!
//! Nothing in here has behaviour beyond (de)serialization helpers.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod id;
pub mod message;

pub use id::RequestId;
pub use message::{RawResponse, Request, Response, DEFAULT_TIMEOUT_MS};

use std::fmt::Debug;
use std::hash::Hash;

/// Key usable as a channel id or an event type.
///
/// Implemented for every clonable, hashable, debuggable, thread-safe type:
/// `String`, `&'static str`, integers and plain enums all qualify.
pub trait RouteKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> RouteKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
