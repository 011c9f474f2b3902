//! The `persistence` module provides the message store: the component that
//! turns submitted content into canonical, immutable [`Message`]s and serves
//! the historical backlog.
//!
//! Two backends are provided:
//! - `memory`: an in-process store guarded by a read/write lock
//! - `sled_store`: an embedded, durable store backed by `sled`
//!
//! Both assign a UUID v4 id and a creation timestamp that never decreases in
//! stored order, and both tolerate concurrent readers and writers.

pub mod memory;
pub mod sled_store;

use async_trait::async_trait;

use crate::broker::message::Message;
use crate::utils::{Error, Result};

pub use memory::MemoryStore;
pub use sled_store::SledStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists `content` and returns the stored message.
    async fn insert(&self, content: &str) -> Result<Message>;

    /// Every stored message, in stored order.
    async fn get_all(&self) -> Result<Vec<Message>>;

    /// Looks up a single message by id.
    async fn get(&self, id: &str) -> Result<Message>;

    async fn len(&self) -> Result<usize>;

    /// Flushes and releases the backend. Called once, after the queue is shut down.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn validate_content(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(Error::invalid_argument("content is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
