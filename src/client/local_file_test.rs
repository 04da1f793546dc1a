use std::sync::Arc;

use tracing_test::traced_test;

use super::*;
use crate::model::SourceKind;
use crate::model::WatchKey;
use crate::properties;
use crate::test_utils::FakeRepository;
use crate::test_utils::RecordingListener;
use crate::ClientError;
use crate::Error;

fn watch_key() -> WatchKey {
    WatchKey::new("someApp", "default", "application")
}

#[tokio::test]
#[traced_test]
async fn test_upstream_snapshot_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = FakeRepository::new("application");
    upstream.preload(&[("k", "v"), ("multi", "a=b")]);
    let repo = LocalFileConfigRepository::new(dir.path(), &watch_key(), Some(upstream.clone()));

    let snapshot = repo.sync().await.unwrap();

    assert_eq!(snapshot.source(), SourceKind::Remote);
    assert_eq!(
        repo.cache_file(),
        dir.path().join("someApp+default+application.properties").as_path()
    );
    let on_disk = properties::parse(&std::fs::read_to_string(repo.cache_file()).unwrap());
    assert_eq!(&on_disk, snapshot.values());
}

#[tokio::test]
async fn test_falls_back_to_cache_file_when_upstream_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("someApp+default+application.properties"),
        "# cached\nk=from-disk\n",
    )
    .unwrap();
    let upstream = FakeRepository::new("application");
    let repo = LocalFileConfigRepository::new(dir.path(), &watch_key(), Some(upstream.clone()));

    let snapshot = repo.get_snapshot().await.unwrap();

    assert_eq!(snapshot.source(), SourceKind::LocalFile);
    assert_eq!(snapshot.get("k"), Some("from-disk"));
    assert_eq!(repo.source_type(), SourceKind::LocalFile);
}

#[tokio::test]
async fn test_no_upstream_and_no_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let repo = LocalFileConfigRepository::new(dir.path(), &watch_key(), None);

    let err = repo.sync().await.unwrap_err();

    assert!(matches!(err, Error::Client(ClientError::NoSnapshot(ns)) if ns == "application"));
}

/// # Case: upstream recovers after the facade started from disk
///
/// ## Setup:
/// 1. cache file holds `k=v`, upstream has nothing
/// 2. upstream publishes the same values, then new ones
///
/// ## Criterias:
/// 1. the facade switches its source to remote without an event
/// 2. the later change is reported and written to disk
#[tokio::test]
#[traced_test]
async fn test_recovery_switches_source_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("someApp+default+application.properties"), "k=v\n").unwrap();
    let upstream = FakeRepository::new("application");
    let repo = LocalFileConfigRepository::new(dir.path(), &watch_key(), Some(upstream.clone()));
    let config = DefaultConfig::builder("application", repo.clone())
        .environment(Arc::new(MapSource::new()))
        .build()
        .await;
    let listener = RecordingListener::new();
    config.add_change_listener(listener.clone());
    assert_eq!(config.source_type(), SourceKind::LocalFile);

    upstream.publish(&[("k", "v")]);
    assert_eq!(config.source_type(), SourceKind::Remote);
    assert_eq!(listener.count(), 0);

    upstream.publish(&[("k", "v2")]);
    assert_eq!(listener.count(), 1);
    assert_eq!(config.get_property("k", ""), "v2");
    let on_disk = std::fs::read_to_string(repo.cache_file()).unwrap();
    assert_eq!(properties::parse(&on_disk).get("k").map(String::as_str), Some("v2"));
}
