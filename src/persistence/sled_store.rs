//! Message store backed by `sled`
//!
//! Messages live in the `messages` tree keyed by a big-endian sequence number
//! from `Db::generate_id`, so iteration yields stored order. A second tree,
//! `message_ids`, maps a message id to its sequence key for lookups.
//!
//! Configuration options supported:
//! - `max_messages`: optional cap on retained messages; when exceeded the
//!   oldest messages are removed on insert.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::{Db, Tree};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MessageStore, validate_content};
use crate::broker::message::Message;
use crate::utils::{Error, Result};

const MESSAGES_TREE: &str = "messages";
const IDS_TREE: &str = "message_ids";

pub struct SledStore {
    db: Db,
    messages: Tree,
    ids: Tree,
    max_messages: Option<usize>,
    // Serialises inserts so key order and timestamp order agree.
    last_created_at: Mutex<Option<DateTime<Utc>>>,
    #[cfg(test)]
    pub(crate) fail_retention: std::sync::atomic::AtomicBool,
}

impl SledStore {
    /// Open or create a sled database at `path` with the given retention policy.
    pub fn open(path: &str, max_messages: Option<usize>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_db(db, max_messages)
    }

    pub fn with_db(db: Db, max_messages: Option<usize>) -> Result<Self> {
        let messages = db.open_tree(MESSAGES_TREE)?;
        let ids = db.open_tree(IDS_TREE)?;

        let last_created_at = match messages.last()? {
            Some((_, value)) => Some(serde_json::from_slice::<Message>(&value)?.created_at),
            None => None,
        };

        Ok(Self {
            db,
            messages,
            ids,
            max_messages,
            last_created_at: Mutex::new(last_created_at),
            #[cfg(test)]
            fail_retention: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn enforce_retention(&self) -> Result<()> {
        let Some(max) = self.max_messages else {
            return Ok(());
        };

        #[cfg(test)]
        if self
            .fail_retention
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::Unknown("retention failed".into()));
        }

        let total = self.messages.len();
        if total <= max {
            return Ok(());
        }

        let excess = total - max;
        let expired: Vec<_> = self
            .messages
            .iter()
            .take(excess)
            .filter_map(|entry| entry.ok())
            .collect();

        for (key, value) in expired {
            self.messages.remove(&key)?;
            match serde_json::from_slice::<Message>(&value) {
                Ok(msg) => {
                    self.ids.remove(msg.id.as_bytes())?;
                }
                Err(e) => warn!(error = %e, "Removed undecodable message during retention"),
            }
        }
        debug!(removed = excess, "Retention limit applied");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SledStore {
    async fn insert(&self, content: &str) -> Result<Message> {
        validate_content(content)?;

        let msg = {
            let mut last = self
                .last_created_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let now = Utc::now();
            let created_at = match *last {
                Some(prev) => now.max(prev),
                None => now,
            };
            let msg = Message {
                id: Uuid::new_v4().to_string(),
                content: content.to_string(),
                created_at,
            };

            let key = self.db.generate_id()?.to_be_bytes();
            let value = serde_json::to_vec(&msg)?;
            self.messages.insert(key, value)?;
            self.ids.insert(msg.id.as_bytes(), &key[..])?;

            *last = Some(created_at);
            msg
        };

        // The message is stored at this point; a retention failure must not
        // turn the insert into a failure.
        if let Err(e) = self.enforce_retention() {
            warn!(message_id = %msg.id, error = %e, "Retention enforcement failed");
        }
        Ok(msg)
    }

    async fn get_all(&self) -> Result<Vec<Message>> {
        self.messages
            .iter()
            .values()
            .map(|value| -> Result<Message> { Ok(serde_json::from_slice(&value?)?) })
            .collect()
    }

    async fn get(&self, id: &str) -> Result<Message> {
        let not_found = || Error::NotFound(format!("message {id}"));
        let key = self.ids.get(id.as_bytes())?.ok_or_else(not_found)?;
        let value = self.messages.get(key)?.ok_or_else(not_found)?;
        Ok(serde_json::from_slice(&value)?)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.messages.len())
    }

    async fn close(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("max_messages", &self.max_messages)
            .finish()
    }
}
