use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::log::{DurableLog, LogReader, LogRecord, StartOffset, wait_for_record};
use crate::utils::{Context, Result};

/// In-process log. Group positions live as long as the value; a record is
/// dropped once every known group has claimed it.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    records: Mutex<Records>,
    groups: Mutex<HashMap<String, u64>>,
    appended: Notify,
}

/// Retained records; `base` is the offset of the front entry.
#[derive(Debug, Default)]
struct Records {
    base: u64,
    entries: VecDeque<Vec<u8>>,
}

impl Records {
    fn end(&self) -> u64 {
        self.base + self.entries.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Vec<u8>> {
        let index = offset.checked_sub(self.base)?;
        self.entries.get(usize::try_from(index).ok()?)
    }

    fn trim_below(&mut self, offset: u64) {
        while self.base < offset && self.entries.pop_front().is_some() {
            self.base += 1;
        }
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Shared {
    fn records(&self) -> MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, group: &str) -> Option<LogRecord> {
        let mut groups = self.groups();
        let mut records = self.records();
        let position = groups.entry(group.to_string()).or_insert(records.base);

        let payload = records.get(*position)?.clone();
        let record = LogRecord {
            offset: *position,
            payload,
        };
        *position += 1;

        if let Some(lowest) = groups.values().copied().min() {
            records.trim_below(lowest);
        }
        Some(record)
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn append(&self, payload: Vec<u8>) -> Result<u64> {
        let offset = {
            let mut records = self.shared.records();
            records.entries.push_back(payload);
            records.end() - 1
        };
        self.shared.appended.notify_waiters();
        Ok(offset)
    }

    fn reader(&self, group: &str, start: StartOffset) -> Result<Arc<dyn LogReader>> {
        {
            let mut groups = self.shared.groups();
            if !groups.contains_key(group) {
                let records = self.shared.records();
                let position = match start {
                    StartOffset::Earliest => records.base,
                    StartOffset::Latest => records.end(),
                };
                groups.insert(group.to_string(), position);
            }
        }

        Ok(Arc::new(MemoryLogReader {
            shared: self.shared.clone(),
            group: group.to_string(),
            closed: Context::new(),
        }))
    }

    fn len(&self) -> usize {
        self.shared.records().entries.len()
    }
}

struct MemoryLogReader {
    shared: Arc<Shared>,
    group: String,
    closed: Context,
}

#[async_trait]
impl LogReader for MemoryLogReader {
    async fn read(&self, ctx: &Context) -> Result<LogRecord> {
        wait_for_record(
            || Ok(self.shared.claim(&self.group)),
            &self.shared.appended,
            ctx,
            &self.closed,
            None,
        )
        .await
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
