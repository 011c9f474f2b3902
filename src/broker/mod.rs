pub mod engine;
pub mod message;

pub use engine::{BroadcastStats, Broadcaster, Notifier};
pub use message::Message;
