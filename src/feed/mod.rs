//! The `feed` module merges the stored backlog with the live fan-out into a
//! single stream per subscriber.

pub mod generator;

pub use generator::{Feed, FeedService, FeedState};
