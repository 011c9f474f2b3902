//! Durable log abstraction
//!
//! The log sits between producers and the insertion workers. It is an
//! ordered, append-only sequence of opaque records read through consumer
//! groups: every record is handed to exactly one `read` call per group, and
//! a group's position outlives the reader that advanced it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::utils::{Context, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Where a consumer group starts when it has no committed position yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartOffset {
    /// From the first retained record.
    Earliest,
    /// From the end of the log: only records appended afterwards.
    #[default]
    Latest,
}

impl FromStr for StartOffset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "earliest" | "first" => Ok(StartOffset::Earliest),
            "latest" | "last" => Ok(StartOffset::Latest),
            other => Err(Error::invalid_argument(format!(
                "unknown start offset '{other}'"
            ))),
        }
    }
}

impl fmt::Display for StartOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOffset::Earliest => write!(f, "earliest"),
            StartOffset::Latest => write!(f, "latest"),
        }
    }
}

#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Appends a record and returns its offset.
    async fn append(&self, payload: Vec<u8>) -> Result<u64>;

    /// Opens a reader for `group`, creating the group at `start` if it has
    /// never been read from.
    fn reader(&self, group: &str, start: StartOffset) -> Result<Arc<dyn LogReader>>;

    /// Number of retained records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes appended records and committed positions durable. Called once
    /// the queue is shut down.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait LogReader: Send + Sync {
    /// Waits for the next record of this reader's group.
    ///
    /// Fails with `Error::Cancelled` when `ctx` is cancelled and with
    /// `Error::LogClosed` once the reader has been closed.
    async fn read(&self, ctx: &Context) -> Result<LogRecord>;

    /// Wakes every pending and future `read` with `Error::LogClosed`.
    fn close(&self);
}

/// Shared wait loop for log readers.
///
/// `claim` must atomically take the next record for the group, if any.
/// `poll_interval` re-checks the log periodically for appends that do not
/// signal `appended` (for example from another process).
pub(crate) async fn wait_for_record<F>(
    claim: F,
    appended: &Notify,
    ctx: &Context,
    closed: &Context,
    poll_interval: Option<Duration>,
) -> Result<LogRecord>
where
    F: Fn() -> Result<Option<LogRecord>>,
{
    loop {
        if closed.is_cancelled() {
            return Err(Error::LogClosed);
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Register interest before checking, so an append between the check
        // and the await still wakes us.
        let notified = appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(record) = claim()? {
            return Ok(record);
        }

        let poll = async {
            match poll_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(Error::LogClosed),
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            _ = &mut notified => {}
            _ = poll => {}
        }
    }
}
