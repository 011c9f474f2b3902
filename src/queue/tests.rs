use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use super::{BackpressureQueue, DurableLog, MemoryLog, SledLog, StartOffset};
use crate::persistence::{MemoryStore, MessageStore};
use crate::tests::support::{FlakyStore, RecordingNotifier, wait_until};
use crate::utils::{Context, Error};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_start_offset_parse() {
    assert_eq!("latest".parse::<StartOffset>().unwrap(), StartOffset::Latest);
    assert_eq!("Earliest".parse::<StartOffset>().unwrap(), StartOffset::Earliest);
    assert!("middle".parse::<StartOffset>().is_err());
    assert_eq!(StartOffset::default(), StartOffset::Latest);
}

#[tokio::test]
async fn test_memory_log_start_offsets() {
    let log = MemoryLog::new();
    log.append(b"old".to_vec()).await.unwrap();

    let latest = log.reader("latest-group", StartOffset::Latest).unwrap();
    let earliest = log.reader("earliest-group", StartOffset::Earliest).unwrap();
    log.append(b"new".to_vec()).await.unwrap();

    let ctx = Context::new();
    assert_eq!(latest.read(&ctx).await.unwrap().payload, b"new");
    assert_eq!(earliest.read(&ctx).await.unwrap().payload, b"old");
    assert_eq!(earliest.read(&ctx).await.unwrap().payload, b"new");
}

#[tokio::test]
async fn test_memory_log_group_position_survives_new_reader() {
    let log = MemoryLog::new();
    for i in 0..3u8 {
        log.append(vec![i]).await.unwrap();
    }

    let ctx = Context::new();
    let first = log.reader("group", StartOffset::Earliest).unwrap();
    assert_eq!(first.read(&ctx).await.unwrap().offset, 0);
    first.close();

    // Start offset only applies to a brand new group.
    let second = log.reader("group", StartOffset::Latest).unwrap();
    assert_eq!(second.read(&ctx).await.unwrap().offset, 1);
}

#[tokio::test]
async fn test_read_waits_for_append() {
    let log = MemoryLog::new();
    let reader = log.reader("group", StartOffset::Latest).unwrap();

    let pending = tokio::spawn(async move { reader.read(&Context::new()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    log.append(b"wake".to_vec()).await.unwrap();
    let record = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap().unwrap();
    assert_eq!(record.payload, b"wake");
}

#[tokio::test]
async fn test_read_honours_cancel_and_close() {
    let log = MemoryLog::new();
    let reader = log.reader("group", StartOffset::Latest).unwrap();

    let ctx = Context::new();
    ctx.cancel();
    assert!(matches!(reader.read(&ctx).await, Err(Error::Cancelled)));

    let waiting = {
        let reader = reader.clone();
        tokio::spawn(async move { reader.read(&Context::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    reader.close();
    let outcome = tokio::time::timeout(WAIT, waiting).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(Error::LogClosed)));
}

async fn assert_each_record_claimed_once(log: Arc<dyn DurableLog>) {
    let reader = log.reader("group", StartOffset::Earliest).unwrap();
    for i in 0..200u32 {
        log.append(i.to_be_bytes().to_vec()).await.unwrap();
    }

    let ctx = Context::new();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reader = reader.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut payloads = Vec::new();
                for _ in 0..50 {
                    payloads.push(reader.read(&ctx).await.unwrap().payload);
                }
                payloads
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in readers {
        for payload in handle.await.unwrap() {
            assert!(seen.insert(payload.clone()), "record {payload:?} claimed twice");
        }
    }
    assert_eq!(seen.len(), 200);
    assert!(log.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_log_claims_each_record_once_per_group() {
    assert_each_record_claimed_once(Arc::new(MemoryLog::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sled_log_claims_each_record_once_per_group() {
    let dir = tempdir().unwrap();
    let log = SledLog::open(dir.path().to_str().unwrap()).unwrap();
    assert_each_record_claimed_once(Arc::new(log)).await;
}

#[tokio::test]
async fn test_memory_log_keeps_records_until_every_group_claims_them() {
    let log = MemoryLog::new();
    let fast = log.reader("fast", StartOffset::Earliest).unwrap();
    let slow = log.reader("slow", StartOffset::Earliest).unwrap();
    for i in 0..3u8 {
        log.append(vec![i]).await.unwrap();
    }

    let ctx = Context::new();
    for _ in 0..3 {
        fast.read(&ctx).await.unwrap();
    }
    assert_eq!(log.len(), 3);

    assert_eq!(slow.read(&ctx).await.unwrap().offset, 0);
    assert_eq!(log.len(), 2);

    // Offsets keep counting after the front of the log is dropped.
    assert_eq!(log.append(vec![9]).await.unwrap(), 3);
    let late = log.reader("late", StartOffset::Earliest).unwrap();
    assert_eq!(late.read(&ctx).await.unwrap().offset, 1);
}

#[tokio::test]
async fn test_sled_log_positions_persist() {
    let dir = tempdir().unwrap();
    let log = SledLog::open(dir.path().to_str().unwrap()).unwrap();
    let ctx = Context::new();

    let first_offset = log.append(b"a".to_vec()).await.unwrap();
    log.append(b"b".to_vec()).await.unwrap();
    assert_eq!(log.len(), 2);

    let reader = log.reader("group", StartOffset::Earliest).unwrap();
    let record = reader.read(&ctx).await.unwrap();
    assert_eq!(record.offset, first_offset);
    assert_eq!(record.payload, b"a");
    reader.close();

    let reader = log.reader("group", StartOffset::Earliest).unwrap();
    assert_eq!(reader.read(&ctx).await.unwrap().payload, b"b");
    assert!(log.is_empty());

    let late = log.reader("late", StartOffset::Latest).unwrap();
    log.append(b"c".to_vec()).await.unwrap();
    assert_eq!(late.read(&ctx).await.unwrap().payload, b"c");
    log.flush().await.unwrap();
}

#[tokio::test]
async fn test_sled_log_flush_keeps_unclaimed_records_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    {
        let log: Arc<dyn DurableLog> = Arc::new(SledLog::open(&path).unwrap());
        let reader = log.reader("group", StartOffset::Earliest).unwrap();
        log.append(b"a".to_vec()).await.unwrap();
        log.append(b"b".to_vec()).await.unwrap();
        assert_eq!(reader.read(&Context::new()).await.unwrap().payload, b"a");
        log.flush().await.unwrap();
    }

    let log = SledLog::open(&path).unwrap();
    assert_eq!(log.len(), 1);
    let reader = log.reader("group", StartOffset::Latest).unwrap();
    assert_eq!(reader.read(&Context::new()).await.unwrap().payload, b"b");
}

fn queue_with(
    store: Arc<dyn MessageStore>,
    notifier: Arc<RecordingNotifier>,
) -> (BackpressureQueue, Context) {
    let ctx = Context::new();
    let queue = BackpressureQueue::new(
        ctx.clone(),
        Arc::new(MemoryLog::new()),
        store,
        notifier,
        BackpressureQueue::DEFAULT_CONSUMER_GROUP,
        StartOffset::Latest,
    )
    .unwrap();
    (queue, ctx)
}

#[tokio::test]
async fn test_enqueue_inserts_then_notifies() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, _ctx) = queue_with(store.clone(), notifier.clone());
    queue.start(1);

    queue.enqueue("test message");

    assert!(wait_until(WAIT, || async { notifier.count() == 1 }).await);
    let stored = store.get_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "test message");
    assert_eq!(notifier.messages()[0], stored[0]);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_single_worker_preserves_submission_order() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, _ctx) = queue_with(store.clone(), notifier.clone());
    queue.start(1);

    let contents: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    for content in &contents {
        queue.enqueue(content);
    }

    assert!(wait_until(WAIT, || async { notifier.count() == 20 }).await);
    let notified: Vec<String> = notifier.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(notified, contents);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_empty_content_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, _ctx) = queue_with(store.clone(), notifier.clone());
    queue.start(1);

    queue.enqueue("");
    queue.enqueue("kept");

    assert!(wait_until(WAIT, || async { notifier.count() == 1 }).await);
    assert_eq!(store.len().await.unwrap(), 1);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_insert_failure_skips_entry_without_notify() {
    let store = Arc::new(FlakyStore::failing_insert_of("bad"));
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, _ctx) = queue_with(store.clone(), notifier.clone());
    queue.start(1);

    queue.enqueue("good-1");
    queue.enqueue("bad");
    queue.enqueue("good-2");

    assert!(wait_until(WAIT, || async { notifier.count() == 2 }).await);
    assert_eq!(store.failed_inserts(), 1);
    let notified: Vec<String> = notifier.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(notified, vec!["good-1", "good-2"]);
    assert_eq!(queue.running_workers(), 1);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_workers() {
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, _ctx) = queue_with(Arc::new(MemoryStore::new()), notifier);
    queue.start(3);
    assert!(wait_until(WAIT, || async { queue.running_workers() == 3 }).await);

    tokio::time::timeout(WAIT, queue.shutdown()).await.unwrap();
    assert_eq!(queue.running_workers(), 0);

    // No panic, the message is simply dropped.
    queue.enqueue("after shutdown");
}

#[tokio::test]
async fn test_service_cancel_stops_workers() {
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, ctx) = queue_with(Arc::new(MemoryStore::new()), notifier);
    queue.start(2);

    ctx.cancel();

    assert!(wait_until(WAIT, || async { queue.running_workers() == 0 }).await);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_zero_workers_means_one_per_cpu() {
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, _ctx) = queue_with(Arc::new(MemoryStore::new()), notifier);
    queue.start(0);

    let expected = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    assert_eq!(queue.running_workers(), expected);

    queue.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_handed_over_entries_to_log() {
    let log = Arc::new(MemoryLog::new());
    let queue = BackpressureQueue::new(
        Context::new(),
        log.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingNotifier::default()),
        "group",
        StartOffset::Latest,
    )
    .unwrap();

    // No workers: entries stay in the log for the next start.
    for i in 0..5 {
        queue.enqueue(&format!("pending-{i}"));
    }
    queue.shutdown().await;

    assert_eq!(log.len(), 5);
}

#[tokio::test]
async fn test_drained_log_does_not_keep_stored_entries() {
    let log = Arc::new(MemoryLog::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let queue = BackpressureQueue::new(
        Context::new(),
        log.clone(),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
        BackpressureQueue::DEFAULT_CONSUMER_GROUP,
        StartOffset::Latest,
    )
    .unwrap();
    queue.start(2);

    for i in 0..50 {
        queue.enqueue(&format!("entry-{i}"));
    }

    assert!(wait_until(WAIT, || async { notifier.count() == 50 }).await);
    assert!(log.is_empty());

    queue.shutdown().await;
}
