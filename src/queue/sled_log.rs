//! Log backed by `sled`
//!
//! Records are stored in the `log` tree under big-endian offsets taken from
//! `Db::generate_id`, so offsets are strictly increasing across restarts but
//! may skip values. Each consumer group's position (the lowest offset it has
//! not yet claimed) is persisted in the `log_groups` tree. Records below the
//! lowest group position are removed after every claim.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sled::{Db, Tree};
use tokio::sync::Notify;
use tracing::debug;

use super::log::{DurableLog, LogReader, LogRecord, StartOffset, wait_for_record};
use crate::utils::{Context, Error, Result};

const LOG_TREE: &str = "log";
const GROUPS_TREE: &str = "log_groups";

/// Appends made by other processes are only noticed on this interval.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct SledLog {
    shared: Arc<Shared>,
}

struct Shared {
    db: Db,
    records: Tree,
    groups: Tree,
    appended: Notify,
    // Claims are read-modify-write on the group position.
    claim_lock: Mutex<()>,
}

impl SledLog {
    pub fn open(path: &str) -> Result<Self> {
        Self::with_db(sled::open(path)?)
    }

    pub fn with_db(db: Db) -> Result<Self> {
        let records = db.open_tree(LOG_TREE)?;
        let groups = db.open_tree(GROUPS_TREE)?;
        Ok(Self {
            shared: Arc::new(Shared {
                db,
                records,
                groups,
                appended: Notify::new(),
                claim_lock: Mutex::new(()),
            }),
        })
    }
}

fn decode_offset(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Unknown(format!("corrupt log offset of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

impl Shared {
    fn end_offset(&self) -> Result<u64> {
        match self.records.last()? {
            Some((key, _)) => Ok(decode_offset(&key)? + 1),
            None => Ok(0),
        }
    }

    fn position(&self, group: &str) -> Result<Option<u64>> {
        self.groups
            .get(group.as_bytes())?
            .map(|raw| decode_offset(&raw))
            .transpose()
    }

    /// Removes every record that all groups have already claimed. Callers
    /// hold `claim_lock`.
    fn trim(&self) -> Result<()> {
        let mut lowest: Option<u64> = None;
        for entry in self.groups.iter().values() {
            let position = decode_offset(&entry?)?;
            lowest = Some(lowest.map_or(position, |low| low.min(position)));
        }
        let Some(lowest) = lowest else {
            return Ok(());
        };

        let claimed: Vec<_> = self
            .records
            .range(..lowest.to_be_bytes())
            .keys()
            .collect::<std::result::Result<_, _>>()?;
        for key in claimed {
            self.records.remove(key)?;
        }
        Ok(())
    }

    fn claim(&self, group: &str) -> Result<Option<LogRecord>> {
        let _guard = self
            .claim_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let position = self.position(group)?.unwrap_or(0);
        let Some(entry) = self.records.range(position.to_be_bytes()..).next() else {
            return Ok(None);
        };
        let (key, value) = entry?;
        let offset = decode_offset(&key)?;

        self.groups
            .insert(group.as_bytes(), &(offset + 1).to_be_bytes()[..])?;
        self.trim()?;

        Ok(Some(LogRecord {
            offset,
            payload: value.to_vec(),
        }))
    }
}

#[async_trait]
impl DurableLog for SledLog {
    async fn append(&self, payload: Vec<u8>) -> Result<u64> {
        let offset = self.shared.db.generate_id()?;
        self.shared.records.insert(offset.to_be_bytes(), payload)?;
        self.shared.appended.notify_waiters();
        Ok(offset)
    }

    fn reader(&self, group: &str, start: StartOffset) -> Result<Arc<dyn LogReader>> {
        {
            let _guard = self
                .shared
                .claim_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if self.shared.position(group)?.is_none() {
                let position = match start {
                    StartOffset::Earliest => 0,
                    StartOffset::Latest => self.shared.end_offset()?,
                };
                self.shared
                    .groups
                    .insert(group.as_bytes(), &position.to_be_bytes()[..])?;
                debug!(group, %start, position, "Consumer group created");
            }
        }

        Ok(Arc::new(SledLogReader {
            shared: self.shared.clone(),
            group: group.to_string(),
            closed: Context::new(),
        }))
    }

    fn len(&self) -> usize {
        self.shared.records.len()
    }

    async fn flush(&self) -> Result<()> {
        self.shared.db.flush_async().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SledLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLog").field("db", &"sled::Db").finish()
    }
}

struct SledLogReader {
    shared: Arc<Shared>,
    group: String,
    closed: Context,
}

#[async_trait]
impl LogReader for SledLogReader {
    async fn read(&self, ctx: &Context) -> Result<LogRecord> {
        wait_for_record(
            || self.shared.claim(&self.group),
            &self.shared.appended,
            ctx,
            &self.closed,
            Some(POLL_INTERVAL),
        )
        .await
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
