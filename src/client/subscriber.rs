use tokio::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

use crate::broker::message::Message;

/// Opaque handle returned by registration and used for removal.
pub type SubscriberId = String;

/// A registered live subscriber.
///
/// The broadcaster only ever holds the sending side; the receiving side is
/// owned by the subscription's feed stream.
#[derive(Debug, Clone)]
pub struct Subscriber {
    /// Unique identifier for the subscription (UUID v4).
    pub id: SubscriberId,

    /// Bounded channel carrying live messages to the subscription.
    pub sender: Sender<Message>,
}

impl Subscriber {
    pub fn new(sender: Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
        }
    }

    /// Creates a subscriber together with the receiving half of a fresh
    /// channel holding at most `capacity` undelivered messages.
    pub fn channel(capacity: usize) -> (Self, Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}
