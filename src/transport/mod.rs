//! The `transport` module is responsible for handling network communication
//! with clients via WebSockets.
//!
//! It defines the JSON control frames exchanged with clients and implements
//! the server: `add` frames are handed to the backpressure queue, and a
//! `feed` frame turns the connection into a feed, one text frame per message
//! in the `H:MM:SS content` line format.

pub mod message;
pub mod websocket;
