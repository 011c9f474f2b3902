//! # Livefeed
//!
//! `livefeed` ingests short text messages, persists them, and serves every
//! subscriber a feed made of the full stored history followed by each new
//! message as it is stored. Clients talk to it over WebSockets.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The message model and the broadcaster that fans stored messages out to subscribers.
//! - `client`: The per-subscription delivery handle.
//! - `config`: Handles loading and managing server configuration.
//! - `feed`: Builds backlog-then-live feeds scoped to a request.
//! - `persistence`: The message store, with an in-memory and a sled-backed implementation.
//! - `queue`: The durable log and the backpressure queue that feeds the store from it.
//! - `transport`: Manages the WebSocket server and communication with clients.
//! - `utils`: Contains shared utilities, such as error handling and cancellation.

pub mod broker;
pub mod client;
pub mod config;
pub mod feed;
pub mod persistence;
pub mod queue;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
