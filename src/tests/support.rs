//! Test doubles and helpers shared by module tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{Message, Notifier};
use crate::persistence::{MemoryStore, MessageStore};
use crate::utils::{Error, Result};

/// Records every notified message, optionally forwarding to another notifier.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<Message>>,
    forward: Option<Arc<dyn Notifier>>,
}

impl RecordingNotifier {
    pub fn forwarding_to(inner: Arc<dyn Notifier>) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            forward: Some(inner),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, msg: Message) {
        self.messages.lock().unwrap().push(msg.clone());
        if let Some(forward) = &self.forward {
            forward.notify(msg).await;
        }
    }
}

/// Memory store that fails inserts of one poisoned content value and can be
/// told to fail every `get_all`.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    poisoned: Option<String>,
    fail_reads: bool,
    failed_inserts: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_insert_of(content: &str) -> Self {
        Self {
            poisoned: Some(content.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn failed_inserts(&self) -> usize {
        self.failed_inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(&self, content: &str) -> Result<Message> {
        if self.poisoned.as_deref() == Some(content) {
            self.failed_inserts.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Unknown("insert failed".into()));
        }
        self.inner.insert(content).await
    }

    async fn get_all(&self) -> Result<Vec<Message>> {
        if self.fail_reads {
            return Err(Error::Unknown("backlog unavailable".into()));
        }
        self.inner.get_all().await
    }

    async fn get(&self, id: &str) -> Result<Message> {
        self.inner.get(id).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }
}

/// Polls `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
