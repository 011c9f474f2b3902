//! Feed generator
//!
//! Every subscription request gets a [`Feed`]: a lazy, single-consumer stream
//! that yields the stored backlog in store order and then whatever the
//! broadcaster delivers, until one of the following happens:
//! - the service context is cancelled (checked first, so shutdown wins)
//! - the request context is cancelled
//! - the broadcaster closes the delivery channel
//!
//! The subscriber is registered *before* the backlog snapshot is read, so no
//! message stored around connect time can fall between the two. A message can
//! then show up in both the snapshot and the live channel; live messages
//! whose id was already yielded from the backlog are skipped.
//!
//! Deregistration is tied to [`Registration`]'s `Drop`, so it runs exactly
//! once on every exit path, including the consumer dropping the feed early.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::stream::{FusedStream, Stream};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, warn};

use crate::broker::{Broadcaster, Message};
use crate::client::{Subscriber, SubscriberId};
use crate::persistence::MessageStore;
use crate::utils::{Context, Result};

type Cancelled = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Initializing,
    StreamingBacklog,
    StreamingLive,
    Terminated,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedState::Initializing => "initializing",
            FeedState::StreamingBacklog => "streaming-backlog",
            FeedState::StreamingLive => "streaming-live",
            FeedState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Keeps a subscriber registered for as long as it lives.
struct Registration {
    id: SubscriberId,
    broadcaster: Arc<Broadcaster>,
}

impl Registration {
    fn new(broadcaster: Arc<Broadcaster>, subscriber: Subscriber) -> Self {
        let id = broadcaster.register(subscriber);
        Self { id, broadcaster }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broadcaster.remove(&self.id);
    }
}

pub struct FeedService {
    ctx: Context,
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<Broadcaster>,
    channel_capacity: usize,
}

impl FeedService {
    /// Live messages buffered per subscriber unless configured otherwise.
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

    pub fn new(
        ctx: Context,
        store: Arc<dyn MessageStore>,
        broadcaster: Arc<Broadcaster>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            ctx,
            store,
            broadcaster,
            channel_capacity,
        }
    }

    /// Opens a feed scoped to `request`. Fails without producing a stream if
    /// the backlog cannot be read.
    pub async fn generate_feed(&self, request: Context) -> Result<Feed> {
        let (subscriber, receiver) = Subscriber::channel(self.channel_capacity);
        let registration = Registration::new(self.broadcaster.clone(), subscriber);
        debug!(subscriber = %registration.id, state = %FeedState::Initializing, "Feed opened");

        // On error `registration` drops here and the subscriber is removed.
        let backlog = self.store.get_all().await?;

        Ok(Feed::new(&self.ctx, &request, backlog, receiver, registration))
    }
}

pub struct Feed {
    state: FeedState,
    id: SubscriberId,
    backlog: VecDeque<Message>,
    backlog_ids: HashSet<String>,
    receiver: Receiver<Message>,
    service_cancelled: Cancelled,
    request_cancelled: Cancelled,
    registration: Option<Registration>,
}

impl Feed {
    fn new(
        service: &Context,
        request: &Context,
        backlog: Vec<Message>,
        receiver: Receiver<Message>,
        registration: Registration,
    ) -> Self {
        let backlog_ids = backlog.iter().map(|msg| msg.id.clone()).collect();
        let service = service.clone();
        let request = request.clone();
        let mut feed = Self {
            state: FeedState::Initializing,
            id: registration.id.clone(),
            backlog: backlog.into(),
            backlog_ids,
            receiver,
            service_cancelled: Box::pin(async move { service.cancelled().await }),
            request_cancelled: Box::pin(async move { request.cancelled().await }),
            registration: Some(registration),
        };
        feed.transition(FeedState::StreamingBacklog);
        feed
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn subscriber_id(&self) -> &SubscriberId {
        &self.id
    }

    fn transition(&mut self, next: FeedState) {
        debug!(subscriber = %self.id, from = %self.state, to = %next, "Feed state change");
        self.state = next;
    }

    fn terminate(&mut self, reason: &str) {
        if self.state == FeedState::Terminated {
            return;
        }
        debug!(subscriber = %self.id, reason, "Feed terminated");
        self.transition(FeedState::Terminated);
        self.receiver.close();
        self.backlog.clear();
        self.registration.take();
    }
}

fn yieldable(id: &SubscriberId, msg: &Message) -> bool {
    match msg.validate() {
        Ok(()) => true,
        Err(e) => {
            warn!(subscriber = %id, error = %e, "Skipping invalid message");
            false
        }
    }
}

impl Stream for Feed {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Message>> {
        let this = self.get_mut();

        loop {
            if this.state == FeedState::Terminated {
                return Poll::Ready(None);
            }
            if this.service_cancelled.as_mut().poll(cx).is_ready() {
                this.terminate("service cancelled");
                continue;
            }
            if this.request_cancelled.as_mut().poll(cx).is_ready() {
                this.terminate("request cancelled");
                continue;
            }

            match this.state {
                FeedState::StreamingBacklog => match this.backlog.pop_front() {
                    Some(msg) => {
                        if yieldable(&this.id, &msg) {
                            return Poll::Ready(Some(msg));
                        }
                    }
                    None => this.transition(FeedState::StreamingLive),
                },
                FeedState::StreamingLive => match this.receiver.poll_recv(cx) {
                    Poll::Ready(Some(msg)) => {
                        if this.backlog_ids.remove(&msg.id) {
                            debug!(subscriber = %this.id, message_id = %msg.id, "Skipping live duplicate of backlog message");
                            continue;
                        }
                        if yieldable(&this.id, &msg) {
                            return Poll::Ready(Some(msg));
                        }
                    }
                    Poll::Ready(None) => this.terminate("channel closed"),
                    Poll::Pending => return Poll::Pending,
                },
                FeedState::Initializing | FeedState::Terminated => {
                    this.terminate("unexpected state");
                }
            }
        }
    }
}

impl FusedStream for Feed {
    fn is_terminated(&self) -> bool {
        self.state == FeedState::Terminated
    }
}

impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feed")
            .field("subscriber", &self.id)
            .field("state", &self.state)
            .field("backlog_remaining", &self.backlog.len())
            .finish()
    }
}
