use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use tracing_test::traced_test;

use super::*;
use crate::test_utils::map;
use crate::Error;
use crate::MemoryStore;
use crate::MockReleaseMessageStore;
use crate::MockReleaseStore;
use crate::ReleaseMessageStore;
use crate::ReleaseStore;
use crate::StorageError;

/// Message store over [`MemoryStore`] that can refuse saves and records the
/// size of every `find_earlier` batch it hands out.
#[derive(Default)]
struct RecordingMessageStore {
    inner: MemoryStore,
    reject_saves: AtomicBool,
    earlier_batches: Mutex<Vec<usize>>,
}

impl ReleaseMessageStore for RecordingMessageStore {
    fn save(
        &self,
        topic: &str,
    ) -> crate::Result<crate::model::ReleaseMessage> {
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected("disk full".to_string()).into());
        }
        self.inner.save(topic)
    }

    fn find_by_id(
        &self,
        id: u64,
    ) -> crate::Result<Option<crate::model::ReleaseMessage>> {
        self.inner.find_by_id(id)
    }

    fn find_earlier(
        &self,
        topic: &str,
        before_id: u64,
        limit: usize,
    ) -> crate::Result<Vec<crate::model::ReleaseMessage>> {
        let batch = self.inner.find_earlier(topic, before_id, limit)?;
        self.earlier_batches.lock().push(batch.len());
        Ok(batch)
    }

    fn find_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> crate::Result<Vec<crate::model::ReleaseMessage>> {
        self.inner.find_after(after_id, limit)
    }

    fn latest_for(
        &self,
        topic: &str,
    ) -> crate::Result<Option<crate::model::ReleaseMessage>> {
        self.inner.latest_for(topic)
    }

    fn max_id(&self) -> crate::Result<u64> {
        self.inner.max_id()
    }

    fn delete_all(
        &self,
        messages: &[crate::model::ReleaseMessage],
    ) -> crate::Result<()> {
        self.inner.delete_all(messages)
    }
}

fn publisher(
    store: &Arc<MemoryStore>,
    queue_capacity: usize,
) -> (ReleasePublisher, CleanupWorker) {
    ReleasePublisher::new(store.clone(), store.clone(), queue_capacity, 100)
}

#[test]
#[traced_test]
fn test_publish_saves_release_then_message() {
    let store = Arc::new(MemoryStore::new());
    let (publisher, _worker) = publisher(&store, 10);

    let message = publisher
        .publish("app+default+application", map(&[("k", "v")]))
        .unwrap();

    assert_eq!(message.id, 1);
    assert_eq!(message.topic, "app+default+application");
    let release = store.find_release("app+default+application").unwrap().unwrap();
    assert_eq!(release.configurations, map(&[("k", "v")]));
    assert!(!release.release_key.is_empty());
    assert_eq!(store.latest_for("app+default+application").unwrap(), Some(message));
    assert!(logs_contain("sending message app+default+application"));
}

#[test]
fn test_publish_rejects_empty_topic() {
    let store = Arc::new(MemoryStore::new());
    let (publisher, _worker) = publisher(&store, 10);

    let err = publisher.publish(" ", BTreeMap::new()).unwrap_err();

    assert!(matches!(err, Error::Server(crate::ServerError::EmptyTopic)));
    assert_eq!(store.message_count(), 0);
}

#[test]
fn test_publish_surfaces_message_store_failure() {
    let mut messages = MockReleaseMessageStore::new();
    messages
        .expect_save()
        .times(1)
        .returning(|_| Err(StorageError::WriteRejected("disk full".to_string()).into()));
    let mut releases = MockReleaseStore::new();
    releases.expect_find_release().returning(|_| Ok(None));
    releases.expect_save_release().times(1).returning(|_| Ok(()));
    releases.expect_delete_release().times(1).returning(|_| Ok(()));
    let (publisher, mut worker) = ReleasePublisher::new(Arc::new(messages), Arc::new(releases), 10, 100);

    let err = publisher.publish("a+default+ns", BTreeMap::new()).unwrap_err();

    assert!(matches!(err, Error::System(crate::SystemError::Storage(StorageError::WriteRejected(_)))));
    assert_eq!(worker.run_pending(), 0);
}

#[test]
fn test_release_store_failure_skips_message() {
    let mut messages = MockReleaseMessageStore::new();
    messages.expect_save().never();
    let mut releases = MockReleaseStore::new();
    releases.expect_find_release().returning(|_| Ok(None));
    releases.expect_delete_release().never();
    releases
        .expect_save_release()
        .returning(|_| Err(StorageError::DbError("closed".to_string()).into()));
    let (publisher, _worker) = ReleasePublisher::new(Arc::new(messages), Arc::new(releases), 10, 100);

    assert!(publisher.publish("a+default+ns", BTreeMap::new()).is_err());
}

/// # Case: the message append fails after the release was written
///
/// ## Setup:
/// 1. `v1` is published successfully
/// 2. the message store starts rejecting saves, then `v2` is published
///
/// ## Criterias:
/// 1. the second publish fails
/// 2. the stored release is still `v1`, same release key
/// 3. no message was added for `v2`
#[test]
#[traced_test]
fn test_failed_message_append_restores_previous_release() {
    let messages = Arc::new(RecordingMessageStore::default());
    let releases = Arc::new(MemoryStore::new());
    let (publisher, _worker) = ReleasePublisher::new(messages.clone(), releases.clone(), 10, 100);

    let first = publisher.publish("a+default+ns", map(&[("k", "v1")])).unwrap();
    let before = releases.find_release("a+default+ns").unwrap().unwrap();

    messages.reject_saves.store(true, Ordering::SeqCst);
    assert!(publisher.publish("a+default+ns", map(&[("k", "v2")])).is_err());

    let after = releases.find_release("a+default+ns").unwrap().unwrap();
    assert_eq!(after.configurations, map(&[("k", "v1")]));
    assert_eq!(after.release_key, before.release_key);
    assert_eq!(messages.latest_for("a+default+ns").unwrap(), Some(first));
    assert!(logs_contain("rolled back"));
}

#[test]
fn test_failed_first_publish_leaves_no_release() {
    let messages = Arc::new(RecordingMessageStore::default());
    messages.reject_saves.store(true, Ordering::SeqCst);
    let releases = Arc::new(MemoryStore::new());
    let (publisher, _worker) = ReleasePublisher::new(messages, releases.clone(), 10, 100);

    assert!(publisher.publish("a+default+ns", map(&[("k", "v1")])).is_err());
    assert_eq!(releases.find_release("a+default+ns").unwrap(), None);
}

/// # Case: 250 releases of one topic, then cleanup of the newest
///
/// ## Criterias:
/// 1. every earlier message is deleted across three batches (100, 100, 49)
/// 2. the newest message and other topics survive
#[test]
#[traced_test]
fn test_cleanup_deletes_all_earlier_messages_of_topic() {
    let store = Arc::new(RecordingMessageStore::default());
    let releases = Arc::new(MemoryStore::new());
    let (publisher, worker) = ReleasePublisher::new(store.clone(), releases, 1, 100);

    for _ in 0..249 {
        store.save("a+default+ns").unwrap();
    }
    let other = store.save("a+default+other").unwrap();
    let newest = publisher.send_message("a+default+ns").unwrap();

    let deleted = worker.clean_message(newest.id).unwrap();

    assert_eq!(deleted, 249);
    assert_eq!(*store.earlier_batches.lock(), vec![100, 100, 49]);
    assert_eq!(store.inner.message_count(), 2);
    assert_eq!(store.latest_for("a+default+ns").unwrap(), Some(newest));
    assert_eq!(store.latest_for("a+default+other").unwrap(), Some(other));
}

#[test]
fn test_cleanup_of_missing_message_is_noop() {
    let store = Arc::new(MemoryStore::new());
    let (_publisher, worker) = publisher(&store, 1);
    store.save("a+default+ns").unwrap();

    assert_eq!(worker.clean_message(42).unwrap(), 0);
    assert_eq!(store.message_count(), 1);
}

/// # Case: cleanup queue is full
///
/// ## Criterias:
/// 1. publishing still succeeds
/// 2. only the queued id is cleaned, the dropped one is not
#[test]
fn test_full_cleanup_queue_drops_without_blocking() {
    let store = Arc::new(MemoryStore::new());
    let (publisher, mut worker) = publisher(&store, 1);

    let first = publisher.send_message("a+default+ns").unwrap();
    let second = publisher.send_message("a+default+ns").unwrap();
    let third = publisher.send_message("a+default+ns").unwrap();
    assert!(first.id < second.id && second.id < third.id);

    assert_eq!(worker.run_pending(), 1);
    // only `first` was queued and nothing precedes it
    assert_eq!(store.message_count(), 3);
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let (publisher, worker) = publisher(&store, 10);
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(worker.run(rx));

    publisher.send_message("a+default+ns").unwrap();
    let newest = publisher.send_message("a+default+ns").unwrap();
    for _ in 0..100 {
        if store.message_count() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(store.message_count(), 1);
    assert_eq!(store.latest_for("a+default+ns").unwrap(), Some(newest));

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
