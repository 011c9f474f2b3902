use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{MessageStore, validate_content};
use crate::broker::message::Message;
use crate::utils::{Error, Result};

/// In-memory message store. Messages are kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Message>> {
        self.messages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Message>> {
        self.messages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, content: &str) -> Result<Message> {
        validate_content(content)?;

        let mut messages = self.write();
        let mut created_at = Utc::now();
        if let Some(last) = messages.last() {
            created_at = created_at.max(last.created_at);
        }

        let msg = Message {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at,
        };
        messages.push(msg.clone());
        Ok(msg)
    }

    async fn get_all(&self) -> Result<Vec<Message>> {
        Ok(self.read().clone())
    }

    async fn get(&self, id: &str) -> Result<Message> {
        self.read()
            .iter()
            .find(|msg| msg.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("message {id}")))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read().len())
    }
}
