use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::repository::RepositoryListeners;
use super::ConfigRepository;
use super::RepositoryChangeListener;
use crate::constants::PROPERTIES_EXTENSION;
use crate::model::ReleaseSnapshot;
use crate::model::SourceKind;
use crate::model::WatchKey;
use crate::properties;
use crate::ClientError;
use crate::Result;

/// Keeps an on-disk copy of every snapshot the upstream repository delivers
/// and serves it when the upstream cannot.
///
/// Cache file: `{cache_dir}/{appId}+{cluster}+{namespace}.properties`.
pub struct LocalFileConfigRepository {
    namespace: String,
    cache_file: PathBuf,
    upstream: Option<Arc<dyn ConfigRepository>>,
    cache: ArcSwapOption<ReleaseSnapshot>,
    sync_lock: tokio::sync::Mutex<()>,
    listeners: RepositoryListeners,
}

impl std::fmt::Debug for LocalFileConfigRepository {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LocalFileConfigRepository")
            .field("namespace", &self.namespace)
            .field("cache_file", &self.cache_file)
            .finish()
    }
}

impl LocalFileConfigRepository {
    pub fn new(
        cache_dir: &Path,
        watch_key: &WatchKey,
        upstream: Option<Arc<dyn ConfigRepository>>,
    ) -> Arc<Self> {
        let cache_file = cache_dir.join(format!("{watch_key}.{PROPERTIES_EXTENSION}"));
        let repository = Arc::new(Self {
            namespace: watch_key.namespace.clone(),
            cache_file,
            upstream,
            cache: ArcSwapOption::empty(),
            sync_lock: tokio::sync::Mutex::new(()),
            listeners: RepositoryListeners::default(),
        });

        if let Some(upstream) = &repository.upstream {
            let weak = Arc::downgrade(&repository) as Weak<dyn RepositoryChangeListener>;
            upstream.add_change_listener(weak);
        }
        repository
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Prefers the upstream snapshot; falls back to the cache file.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn sync(&self) -> Result<Arc<ReleaseSnapshot>> {
        let _guard = self.sync_lock.lock().await;

        if let Some(upstream) = &self.upstream {
            match upstream.get_snapshot().await {
                Ok(snapshot) => {
                    self.adopt(snapshot.clone());
                    return Ok(snapshot);
                }
                Err(e) => {
                    warn!(
                        "sync config from upstream repository failed, reason: {}; falling back to {}",
                        e,
                        self.cache_file.display()
                    );
                }
            }
        }

        if let Some(current) = self.cache.load_full() {
            return Ok(current);
        }

        let snapshot = Arc::new(self.load_from_file().await?);
        debug!("loaded cached config from {}", self.cache_file.display());
        self.cache.store(Some(snapshot.clone()));
        Ok(snapshot)
    }

    async fn load_from_file(&self) -> Result<ReleaseSnapshot> {
        match tokio::fs::read_to_string(&self.cache_file).await {
            Ok(content) => Ok(ReleaseSnapshot::new(
                self.namespace.clone(),
                "",
                properties::parse(&content),
                SourceKind::LocalFile,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ClientError::NoSnapshot(self.namespace.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stores and persists `snapshot`; returns false when neither the values
    /// nor the source changed.
    fn adopt(
        &self,
        snapshot: Arc<ReleaseSnapshot>,
    ) -> bool {
        let unchanged = self
            .cache
            .load_full()
            .map(|current| {
                current.values() == snapshot.values() && current.source() == snapshot.source()
            })
            .unwrap_or(false);

        self.cache.store(Some(snapshot.clone()));
        if let Err(e) = self.persist(&snapshot) {
            warn!("persist local cache file {} failed: {}", self.cache_file.display(), e);
        }
        !unchanged
    }

    fn persist(
        &self,
        snapshot: &ReleaseSnapshot,
    ) -> Result<()> {
        if let Some(parent) = self.cache_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.cache_file.with_extension("tmp");
        let comment = format!("Persisted by beacon, release key {}", snapshot.release_key());
        std::fs::write(&tmp, properties::render(&comment, snapshot.values()))?;
        std::fs::rename(&tmp, &self.cache_file)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for LocalFileConfigRepository {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn current(&self) -> Option<Arc<ReleaseSnapshot>> {
        self.cache.load_full()
    }

    async fn get_snapshot(&self) -> Result<Arc<ReleaseSnapshot>> {
        match self.cache.load_full() {
            Some(snapshot) => Ok(snapshot),
            None => self.sync().await,
        }
    }

    fn add_change_listener(
        &self,
        listener: Weak<dyn RepositoryChangeListener>,
    ) {
        self.listeners.add(listener);
    }
}

impl RepositoryChangeListener for LocalFileConfigRepository {
    fn on_repository_change(
        &self,
        _namespace: &str,
        snapshot: Arc<ReleaseSnapshot>,
    ) {
        if self.adopt(snapshot.clone()) {
            self.listeners.fire(&self.namespace, &snapshot);
        }
    }
}
