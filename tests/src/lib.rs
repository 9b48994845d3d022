//! # Crab Test Suite
//!
//! Cross-crate tests: a real [`AsyncChannel`](crab_channel::AsyncChannel)
//! talking to a real [`Kernel`](crab_kernel::Kernel) through an in-memory
//! transport.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # mpsc loopback transport and wiring
//! └── integration/
//!     ├── round_trip.rs     # request → pipeline → response
//!     ├── pipelines.rs      # ordering, leading/trailing, failures
//!     ├── timeouts.rs       # both sweeps
//!     └── cross_resolving.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p crab-tests
//! cargo test -p crab-tests integration::cross_resolving::
//! ```

#![allow(dead_code)]
