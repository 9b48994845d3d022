//! # Crab Channel - Client Correlator
//!
//! Promise-style requests over push-only transports.
//!
//! ```text
//! caller ──request()──▶ PendingRequestStore ──push()──▶ Transport ~~▶ remote kernel
//!   ▲                          │                                         │
//!   └──── settle (once) ◀──────┴──── handle_incoming(response) ◀~~~~~~~~┘
//!                              ▲
//!                       sweep_task (timeouts)
//! ```
//!
//! Every request settles exactly once: resolved by a matching response,
//! rejected by a response carrying `error`, or rejected by the timeout sweep.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crab_channel::AsyncChannel;
//! use serde_json::json;
//!
//! let channel = AsyncChannel::new(my_transport)?;
//! let response = channel.request(json!({ "type": "Greeting" })).await?;
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod channel;
pub mod config;
pub mod error;
pub mod pending;
pub mod transport;

pub use channel::AsyncChannel;
pub use config::ChannelConfig;
pub use error::{ChannelError, ChannelResult, TransportError};
pub use pending::{PendingRequestStore, PendingStats};
pub use transport::{Transport, UnboundTransport};
