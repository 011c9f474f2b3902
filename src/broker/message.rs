use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

/// A message accepted by the system.
///
/// `content` is what the producer submitted; `id` and `created_at` are
/// assigned exactly once by the message store on insertion. A stored message
/// is never mutated afterwards.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use livefeed::broker::message::Message;
///
/// let msg = Message {
///     id: "6f1c".to_string(),
///     content: "hello".to_string(),
///     created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap(),
/// };
/// assert_eq!(msg.to_line(), "9:03:07 hello\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Checks the id/content/timestamp invariant. Invalid messages must not
    /// reach subscribers.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid_argument("id is required"));
        }
        if self.content.is_empty() {
            return Err(Error::invalid_argument("content is required"));
        }
        if self.created_at == DateTime::<Utc>::UNIX_EPOCH {
            return Err(Error::invalid_argument("createdAt is not set"));
        }
        Ok(())
    }

    /// The feed wire line: `H:MM:SS content`, newline-terminated.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02} {}",
            self.created_at.hour(),
            self.created_at.minute(),
            self.created_at.second(),
            self.content
        )
    }
}
