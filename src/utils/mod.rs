//! The `utils` module provides a collection of utilities and common
//! definitions used across the `livefeed` crate.
//!
//! - `error`: the crate-wide error type and its coarse error codes.
//! - `context`: cooperative cancellation signals for service and request scopes.
//! - `logging`: `tracing` subscriber initialisation.

pub mod context;
pub mod error;
pub mod logging;

pub use context::Context;
pub use error::{Error, ErrorCode, Result};
