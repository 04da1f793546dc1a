use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use super::map;
use crate::model::ReleaseSnapshot;
use crate::model::SourceKind;
use crate::ClientError;
use crate::ConfigRepository;
use crate::RepositoryChangeListener;
use crate::RepositoryListeners;
use crate::Result;

/// In-memory repository whose snapshots are published by the test.
#[derive(Default)]
pub struct FakeRepository {
    namespace: String,
    cache: ArcSwapOption<ReleaseSnapshot>,
    listeners: RepositoryListeners,
    releases: AtomicU64,
}

impl FakeRepository {
    pub fn new(namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            ..Default::default()
        })
    }

    /// Stores a new snapshot and fires listeners, like a remote fetch would.
    pub fn publish(
        &self,
        pairs: &[(&str, &str)],
    ) -> Arc<ReleaseSnapshot> {
        let release = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(ReleaseSnapshot::new(
            self.namespace.clone(),
            format!("release-{release}"),
            map(pairs),
            SourceKind::Remote,
        ));
        self.cache.store(Some(snapshot.clone()));
        self.listeners.fire(&self.namespace, &snapshot);
        snapshot
    }

    /// Stores without notifying anyone.
    pub fn preload(
        &self,
        pairs: &[(&str, &str)],
    ) {
        let snapshot = ReleaseSnapshot::new(self.namespace.clone(), "preloaded", map(pairs), SourceKind::Remote);
        self.cache.store(Some(Arc::new(snapshot)));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[async_trait]
impl ConfigRepository for FakeRepository {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn current(&self) -> Option<Arc<ReleaseSnapshot>> {
        self.cache.load_full()
    }

    async fn get_snapshot(&self) -> Result<Arc<ReleaseSnapshot>> {
        self.cache
            .load_full()
            .ok_or_else(|| ClientError::NoSnapshot(self.namespace.clone()).into())
    }

    fn add_change_listener(
        &self,
        listener: Weak<dyn RepositoryChangeListener>,
    ) {
        self.listeners.add(listener);
    }
}
