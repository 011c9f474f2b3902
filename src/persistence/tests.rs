use std::sync::Arc;

use tempfile::{TempDir, tempdir};

use super::{MemoryStore, MessageStore, SledStore};
use crate::utils::ErrorCode;

fn create_sled_store(max: Option<usize>) -> (SledStore, TempDir) {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap(), max).unwrap();
    (store, dir)
}

async fn assert_insert_assigns_identity(store: &dyn MessageStore) {
    let msg = store.insert("Test Message").await.unwrap();

    assert!(!msg.id.is_empty());
    assert_eq!(msg.content, "Test Message");
    assert!(msg.validate().is_ok());
    assert_eq!(store.len().await.unwrap(), 1);
}

async fn assert_stored_order(store: &dyn MessageStore) {
    let contents: Vec<String> = (0..50).map(|i| format!("msg{i}")).collect();
    for content in &contents {
        store.insert(content).await.unwrap();
    }

    let stored = store.get_all().await.unwrap();
    let stored_contents: Vec<String> = stored.iter().map(|m| m.content.clone()).collect();
    assert_eq!(stored_contents, contents);

    for pair in stored.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
    assert!(stored.iter().all(|m| m.validate().is_ok()));
}

async fn assert_rejects_empty_content(store: &dyn MessageStore) {
    let err = store.insert("").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(store.len().await.unwrap(), 0);
}

async fn assert_lookup(store: &dyn MessageStore) {
    let msg = store.insert("findable").await.unwrap();
    assert_eq!(store.get(&msg.id).await.unwrap(), msg);

    let err = store.get("missing").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_memory_insert_assigns_identity() {
    assert_insert_assigns_identity(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_get_all_preserves_stored_order() {
    assert_stored_order(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_rejects_empty_content() {
    assert_rejects_empty_content(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_memory_lookup() {
    assert_lookup(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_empty_store_returns_empty_vec() {
    let store = MemoryStore::new();
    assert!(store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sled_insert_assigns_identity() {
    let (store, _dir) = create_sled_store(None);
    assert_insert_assigns_identity(&store).await;
}

#[tokio::test]
async fn test_sled_get_all_preserves_stored_order() {
    let (store, _dir) = create_sled_store(None);
    assert_stored_order(&store).await;
}

#[tokio::test]
async fn test_sled_rejects_empty_content() {
    let (store, _dir) = create_sled_store(None);
    assert_rejects_empty_content(&store).await;
}

#[tokio::test]
async fn test_sled_lookup() {
    let (store, _dir) = create_sled_store(None);
    assert_lookup(&store).await;
}

#[tokio::test]
async fn test_sled_max_messages_limit() {
    let (store, _dir) = create_sled_store(Some(3));

    for i in 0..5 {
        store.insert(&format!("msg{i}")).await.unwrap();
    }

    let contents: Vec<String> = store
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["msg2", "msg3", "msg4"]);
}

#[tokio::test]
async fn test_sled_insert_succeeds_when_retention_fails() {
    let (store, _dir) = create_sled_store(Some(1));
    store.insert("first").await.unwrap();
    store
        .fail_retention
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let msg = store.insert("second").await.unwrap();

    assert_eq!(msg.content, "second");
    assert_eq!(store.get(&msg.id).await.unwrap(), msg);
    // Nothing was evicted, so the cap is temporarily exceeded.
    assert_eq!(store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_sled_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    let first = {
        let store = SledStore::open(&path, None).unwrap();
        let first = store.insert("before restart").await.unwrap();
        store.close().await.unwrap();
        first
    };

    let store = SledStore::open(&path, None).unwrap();
    let second = store.insert("after restart").await.unwrap();
    let all = store.get_all().await.unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(all[0], first);
    assert!(second.created_at >= first.created_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_and_writes() {
    let store = Arc::new(MemoryStore::new());

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    store.insert(&format!("w{w}-{i}")).await.unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..25 {
                let snapshot = store.get_all().await.unwrap();
                for pair in snapshot.windows(2) {
                    assert!(pair[0].created_at <= pair[1].created_at);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    reader.await.unwrap();

    assert_eq!(store.len().await.unwrap(), 100);
}
