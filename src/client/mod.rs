//! The `client` module defines how a live subscriber is represented inside
//! the fan-out registry.
//!
//! It provides the `Subscriber` struct: an opaque registration handle plus
//! the sending half of a bounded delivery channel.

pub mod subscriber;
pub use subscriber::{Subscriber, SubscriberId};

#[cfg(test)]
mod tests;
