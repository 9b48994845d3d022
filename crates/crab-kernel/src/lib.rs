//! # Crab Kernel - Dispatch Kernel
//!
//! Routes inbound requests through ordered middleware pipelines keyed by
//! (channel, event type) and guarantees each request is answered once.
//!
//! ```text
//!                 ┌──────────────────── Kernel ─────────────────────┐
//! transport ──▶   │ registry[channel][event] = [mw₀, mw₁, … mwₙ]    │
//!  execute()      │      │                                          │
//!                 │      ▼  mwᵢ(request, respond, next?)            │
//!                 │  Responder (once) ──▶ in-flight entry removed  ─┼──▶ respond(Response)
//!                 │      ▲                                          │
//!                 │  sweep_task: RequestTimeout + cross cascade     │
//!                 └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crab_kernel::{KernelBuilder, MiddlewareResult, Next, Responder};
//! use crab_types::{RawResponse, Request};
//! use serde_json::json;
//!
//! async fn greet(_request: Request, respond: Responder, _next: Option<Next<String>>) -> MiddlewareResult {
//!     respond.respond(RawResponse::ok(json!({ "message": "hello" })))?;
//!     Ok(())
//! }
//!
//! let kernel = KernelBuilder::new()
//!     .channel("App".to_string())
//!     .handle("Greeting".to_string())
//!     .with(greet)
//!     .run()?;
//!
//! kernel.dispatch("App".to_string(), request, move |response| port.post(response));
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod builder;
pub mod config;
pub mod cross;
pub mod error;
pub mod kernel;
pub mod middleware;
pub mod responder;

mod registry;

pub use builder::KernelBuilder;
pub use config::KernelConfig;
pub use cross::{CrossResolver, CrossResolvingRequest, RESOLVE_ID_FIELD};
pub use error::{CrossResolvingError, KernelError, KernelResult, RegistrationError};
pub use kernel::Kernel;
pub use middleware::{from_fn, Middleware, MiddlewareResult, Next, Pipeline};
pub use responder::Responder;
