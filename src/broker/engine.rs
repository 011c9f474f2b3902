//! Broadcaster engine
//!
//! This module contains the fan-out registry responsible for:
//! - tracking the set of live subscribers (handle -> bounded sender)
//! - delivering every newly stored message to each of them
//! - dropping a message for a subscriber that cannot take it in time
//!
//! Concurrency and usage notes:
//! - The subscriber map sits behind a `std::sync::Mutex` that is held only
//!   while the map is read or changed. `notify` copies the senders out and
//!   releases the lock before it waits on any subscriber.
//! - Deliveries to different subscribers run concurrently, each bounded by
//!   the configured timeout, so a stalled subscriber costs the others at most
//!   one timeout window and never blocks registration or removal.
//! - Delivery is at-most-once and best-effort per subscriber.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use crate::broker::message::Message;
use crate::client::{Subscriber, SubscriberId};

/// Receives every message once it has been durably stored.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, msg: Message);
}

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub notified: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, Sender<Message>>>,
    delivery_timeout: Duration,
    notified: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Broadcaster {
    /// Delivery window used by [`Broadcaster::default`].
    pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(100);

    pub fn new(delivery_timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            delivery_timeout,
            notified: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Adds a subscriber and returns its handle.
    pub fn register(&self, subscriber: Subscriber) -> SubscriberId {
        let id = subscriber.id.clone();
        self.lock().insert(subscriber.id, subscriber.sender);
        debug!(subscriber = %id, "Subscriber registered");
        id
    }

    /// Removes a subscriber. Unknown or already-removed handles are a no-op.
    pub fn remove(&self, id: &SubscriberId) {
        if self.lock().remove(id).is_some() {
            debug!(subscriber = %id, "Subscriber removed");
        }
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every registered sender. Live feeds observe their channel
    /// closing and terminate.
    pub fn close(&self) {
        let removed = std::mem::take(&mut *self.lock());
        debug!(subscribers = removed.len(), "Broadcaster closed");
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            notified: self.notified.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Delivers `msg` to every currently registered subscriber.
    pub async fn broadcast(&self, msg: Message) {
        self.notified.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(SubscriberId, Sender<Message>)> = self
            .lock()
            .iter()
            .map(|(id, sender)| (id.clone(), sender.clone()))
            .collect();

        if targets.is_empty() {
            return;
        }

        let timeout = self.delivery_timeout;
        let deliveries = targets.into_iter().map(|(id, sender)| {
            let msg = msg.clone();
            async move { (id, sender.send_timeout(msg, timeout).await) }
        });

        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(SendTimeoutError::Timeout(dropped)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = %id,
                        message_id = %dropped.id,
                        "Subscriber too slow, message dropped"
                    );
                }
                Err(SendTimeoutError::Closed(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = %id, "Subscriber channel closed, pruning");
                    self.remove(&id);
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, Sender<Message>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELIVERY_TIMEOUT)
    }
}

#[async_trait]
impl Notifier for Broadcaster {
    async fn notify(&self, msg: Message) {
        self.broadcast(msg).await;
    }
}
