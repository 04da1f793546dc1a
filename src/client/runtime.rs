use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::ConfigRepository;
use super::DefaultConfig;
use super::EnvironmentSource;
use super::HttpClient;
use super::LocalFileConfigRepository;
use super::LongPollClient;
use super::MapSource;
use super::MetaServiceLocator;
use super::PropertySource;
use super::RemoteConfigRepository;
use super::ReqwestHttpClient;
use super::ServiceLocator;
use super::StaticServiceLocator;
use crate::async_task::spawn_task;
use crate::model::WatchKey;
use crate::ClientError;
use crate::ClientSettings;
use crate::Result;

/// Owns everything a client process needs: transport, discovery, the shared
/// long poll, one facade per namespace and the background tasks behind them.
///
/// Tasks are stopped by [`ClientRuntime::shutdown`] or when the runtime is
/// dropped.
pub struct ClientRuntime {
    settings: Arc<ClientSettings>,
    http: Arc<dyn HttpClient>,
    locator: Arc<dyn ServiceLocator>,
    /// Set when services come from a meta server; refreshed in the background
    discovery: Option<Arc<MetaServiceLocator>>,
    discovery_started: AtomicBool,
    long_poll: Arc<LongPollClient>,
    overrides: Arc<dyn PropertySource>,
    environment: Arc<dyn PropertySource>,

    configs: DashMap<String, Arc<DefaultConfig>>,
    /// Serializes facade creation so a namespace is wired exactly once
    creating: tokio::sync::Mutex<()>,

    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("app_id", &self.settings.app_id)
            .field("namespaces", &self.configs.len())
            .finish()
    }
}

impl ClientRuntime {
    /// Validates `settings` and wires the reqwest transport with a static or
    /// meta-server locator.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        settings.validate()?;
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(settings.connect_timeout())?);
        match settings.meta_server.clone() {
            Some(meta) => {
                let locator = Arc::new(MetaServiceLocator::new(meta, &settings, http.clone()));
                Ok(Self::with_discovery(settings, http, locator))
            }
            None => {
                let locator = Arc::new(StaticServiceLocator::new(settings.config_services.clone()));
                Ok(Self::with_transport(settings, http, locator))
            }
        }
    }

    /// Like [`Self::with_transport`], with a meta-server locator whose list
    /// is refreshed in the background once the first namespace is loaded.
    pub fn with_discovery(
        settings: ClientSettings,
        http: Arc<dyn HttpClient>,
        locator: Arc<MetaServiceLocator>,
    ) -> Self {
        let mut runtime = Self::with_transport(settings, http, locator.clone());
        runtime.discovery = Some(locator);
        runtime
    }

    pub fn with_transport(
        settings: ClientSettings,
        http: Arc<dyn HttpClient>,
        locator: Arc<dyn ServiceLocator>,
    ) -> Self {
        let settings = Arc::new(settings);
        let long_poll = Arc::new(LongPollClient::new(settings.clone(), http.clone(), locator.clone()));
        Self {
            settings,
            http,
            locator,
            discovery: None,
            discovery_started: AtomicBool::new(false),
            long_poll,
            overrides: Arc::new(MapSource::new()),
            environment: Arc::new(EnvironmentSource),
            configs: DashMap::new(),
            creating: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Process-level overrides consulted before any repository value.
    pub fn with_overrides(
        mut self,
        overrides: Arc<dyn PropertySource>,
    ) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_environment(
        mut self,
        environment: Arc<dyn PropertySource>,
    ) -> Self {
        self.environment = environment;
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn long_poll(&self) -> &Arc<LongPollClient> {
        &self.long_poll
    }

    /// Facade for `namespace`, created and wired on first use.
    ///
    /// Never fails because the control plane is down; only a shut-down
    /// runtime is an error.
    pub async fn config(
        &self,
        namespace: &str,
    ) -> Result<Arc<DefaultConfig>> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::ShutDown.into());
        }
        if let Some(config) = self.cached(namespace) {
            return Ok(config);
        }

        let _creating = self.creating.lock().await;
        if let Some(config) = self.cached(namespace) {
            return Ok(config);
        }

        let remote = Arc::new(RemoteConfigRepository::new(
            namespace,
            self.settings.clone(),
            self.http.clone(),
            self.locator.clone(),
        ));
        let repository: Arc<dyn ConfigRepository> = match &self.settings.cache_dir {
            Some(dir) => {
                let watch_key = WatchKey::new(&self.settings.app_id, &self.settings.cluster, namespace);
                LocalFileConfigRepository::new(dir, &watch_key, Some(remote.clone()))
            }
            None => remote.clone(),
        };

        let config = DefaultConfig::builder(namespace, repository)
            .overrides(self.overrides.clone())
            .environment(self.environment.clone())
            .resource_dir(self.settings.resource_dir.clone())
            .build()
            .await;

        {
            let mut handles = self.handles.lock();
            if let Some(discovery) = &self.discovery {
                if !self.discovery_started.swap(true, Ordering::AcqRel) {
                    let discovery = discovery.clone();
                    let cancel = self.cancel.child_token();
                    spawn_task(
                        "config-service-refresh",
                        move || discovery.run_periodic_refresh(cancel),
                        Some(&mut *handles),
                    );
                }
            }

            let refresh = remote.clone();
            let cancel = self.cancel.child_token();
            spawn_task(
                &format!("periodic-refresh-{namespace}"),
                move || refresh.run_periodic_refresh(cancel),
                Some(&mut *handles),
            );

            self.long_poll.register(namespace, remote);
            if let Some(handle) = self.long_poll.start(self.cancel.child_token()) {
                handles.push(handle);
            }
        }

        self.configs.insert(namespace.to_string(), config.clone());
        info!("config for namespace {} is ready ({})", namespace, config.source_type());
        Ok(config)
    }

    /// Stops every background task and waits for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        debug!("waiting for {} client tasks", handles.len());
        for handle in handles {
            let _ = handle.await;
        }
        info!("client runtime shut down");
    }

    fn cached(
        &self,
        namespace: &str,
    ) -> Option<Arc<DefaultConfig>> {
        self.configs.get(namespace).map(|c| c.value().clone())
    }
}

impl Drop for ClientRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
