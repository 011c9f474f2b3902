//! The `queue` module decouples producer submissions from storage writes.
//!
//! - `log`: the durable log contract (`DurableLog`, `LogReader`)
//! - `memory_log` / `sled_log`: in-process and on-disk log backends
//! - `backpressure`: the `BackpressureQueue` and its insertion workers

pub mod backpressure;
pub mod log;
pub mod memory_log;
pub mod sled_log;

pub use backpressure::BackpressureQueue;
pub use log::{DurableLog, LogReader, LogRecord, StartOffset};
pub use memory_log::MemoryLog;
pub use sled_log::SledLog;

#[cfg(test)]
mod tests;
