use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use autometrics::autometrics;
use parking_lot::Mutex;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::time::interval_at;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use url::Url;

use super::signed_headers;
use super::HttpClient;
use super::HttpRequest;
use super::ServiceLocator;
use crate::model::ConfigResponse;
use crate::model::NotificationMessages;
use crate::model::ReleaseSnapshot;
use crate::model::ServiceAddress;
use crate::model::SourceKind;
use crate::net::join_url;
use crate::rate_limit::RateLimiter;
use crate::schedule::ExponentialSchedulePolicy;
use crate::schedule::SchedulePolicy;
use crate::ClientError;
use crate::ClientSettings;
use crate::Error;
use crate::NetworkError;
use crate::Result;
use crate::API_SLO;
use crate::CONFIG_FETCH_DURATION_MS;
use crate::CONFIG_FETCH_TOTAL;

/// Receives every snapshot a repository publishes.
pub trait RepositoryChangeListener: Send + Sync + 'static {
    fn on_repository_change(
        &self,
        namespace: &str,
        snapshot: Arc<ReleaseSnapshot>,
    );
}

/// Receives the long poll's "something changed" signal for one namespace.
pub trait LongPollListener: Send + Sync + 'static {
    /// `service` answered the long poll and most likely already has the new
    /// release; `messages` explains which release ids fired.
    fn on_long_poll_notified(
        &self,
        service: &ServiceAddress,
        messages: Option<NotificationMessages>,
    );
}

/// A source of snapshots for one namespace.
#[async_trait]
pub trait ConfigRepository: Send + Sync + 'static {
    fn namespace(&self) -> &str;

    /// Last published snapshot; never blocks.
    fn current(&self) -> Option<Arc<ReleaseSnapshot>>;

    /// Cached snapshot, or the outcome of a first synchronous load when
    /// nothing has been loaded yet.
    async fn get_snapshot(&self) -> Result<Arc<ReleaseSnapshot>>;

    /// Listeners are held weakly and pruned once dropped.
    fn add_change_listener(
        &self,
        listener: Weak<dyn RepositoryChangeListener>,
    );

    fn source_type(&self) -> SourceKind {
        self.current().map(|s| s.source()).unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct RepositoryListeners {
    listeners: RwLock<Vec<Weak<dyn RepositoryChangeListener>>>,
}

impl RepositoryListeners {
    pub(crate) fn add(
        &self,
        listener: Weak<dyn RepositoryChangeListener>,
    ) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| l.ptr_eq(&listener)) {
            listeners.push(listener);
        }
    }

    pub(crate) fn fire(
        &self,
        namespace: &str,
        snapshot: &Arc<ReleaseSnapshot>,
    ) {
        let live: Vec<Arc<dyn RepositoryChangeListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_repository_change(namespace, snapshot.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

/// Fetches one namespace from the config services over conditional HTTP.
///
/// # Invariants
/// - only [`RemoteConfigRepository::sync`] replaces the cached snapshot, and
///   it holds `fetch_state` while doing so: at most one fetch in flight and
///   readers see either the old or the new snapshot
/// - a `304` returns the cached `Arc` itself, so "unchanged" is pointer
///   equality and fires nothing
pub struct RemoteConfigRepository {
    namespace: String,
    settings: Arc<ClientSettings>,
    http: Arc<dyn HttpClient>,
    locator: Arc<dyn ServiceLocator>,

    cache: ArcSwapOption<ReleaseSnapshot>,

    /// Held for the whole fetch-and-swap; owns the fetch backoff state
    fetch_state: tokio::sync::Mutex<ExponentialSchedulePolicy>,
    rate_limiter: RateLimiter,

    force_refresh: AtomicBool,
    refresh_requested: Notify,

    /// Address that answered the last long poll; used first, once
    long_poll_service: Mutex<Option<ServiceAddress>>,
    remote_messages: Mutex<Option<NotificationMessages>>,

    listeners: RepositoryListeners,
}

impl std::fmt::Debug for RemoteConfigRepository {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RemoteConfigRepository")
            .field("namespace", &self.namespace)
            .field(
                "release_key",
                &self.cache.load_full().map(|s| s.release_key().to_string()),
            )
            .finish()
    }
}

impl RemoteConfigRepository {
    pub fn new(
        namespace: impl Into<String>,
        settings: Arc<ClientSettings>,
        http: Arc<dyn HttpClient>,
        locator: Arc<dyn ServiceLocator>,
    ) -> Self {
        let policy = ExponentialSchedulePolicy::new(
            settings.on_error_retry_interval(),
            settings.on_error_retry_interval_cap(),
        );
        let rate_limiter = RateLimiter::new(settings.load_config_qps);
        Self {
            namespace: namespace.into(),
            settings,
            http,
            locator,
            cache: ArcSwapOption::empty(),
            fetch_state: tokio::sync::Mutex::new(policy),
            rate_limiter,
            // the first load gets the forced-refresh retry budget
            force_refresh: AtomicBool::new(true),
            refresh_requested: Notify::new(),
            long_poll_service: Mutex::new(None),
            remote_messages: Mutex::new(None),
            listeners: RepositoryListeners::default(),
        }
    }

    /// Runs one fetch and publishes the result if it differs from the cache.
    ///
    /// On failure the previous snapshot stays authoritative.
    #[autometrics(objective = API_SLO)]
    pub async fn sync(&self) -> Result<Arc<ReleaseSnapshot>> {
        let mut policy = self.fetch_state.lock().await;
        let previous = self.cache.load_full();
        let current = self.load_config(&mut policy, previous.as_ref()).await?;

        let replaced = match &previous {
            Some(previous) => !Arc::ptr_eq(previous, &current),
            None => true,
        };
        if replaced {
            info!(
                namespace = %self.namespace,
                release_key = current.release_key(),
                "remote config refreshed"
            );
            self.cache.store(Some(current.clone()));
            self.listeners.fire(&self.namespace, &current);
        }
        Ok(current)
    }

    /// Requests an immediate re-fetch from the background task.
    pub fn force_refresh(&self) {
        self.force_refresh.store(true, Ordering::Release);
        self.refresh_requested.notify_one();
    }

    /// Background loop: fetches every `refresh_interval` and whenever a
    /// forced refresh is requested, until `cancel` fires.
    pub async fn run_periodic_refresh(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let period = self.settings.refresh_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(namespace = %self.namespace, "schedule periodic refresh every {:?}", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(namespace = %self.namespace, "refresh task stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    trace!(namespace = %self.namespace, "periodic refresh");
                }
                _ = self.refresh_requested.notified() => {
                    trace!(namespace = %self.namespace, "forced refresh");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.sync() => {
                    if let Err(e) = result {
                        warn!(namespace = %self.namespace, "sync failed: {}", e);
                    }
                }
            }
        }
    }

    async fn load_config(
        &self,
        policy: &mut ExponentialSchedulePolicy,
        previous: Option<&Arc<ReleaseSnapshot>>,
    ) -> Result<Arc<ReleaseSnapshot>> {
        let acquire_timeout = self.settings.rate_limit_acquire_timeout();
        if !self.rate_limiter.acquire_timeout(acquire_timeout).await {
            // fail open after waiting out the window
            sleep(acquire_timeout).await;
        }

        let max_retries = if self.force_refresh.load(Ordering::Acquire) {
            2
        } else {
            1
        };
        let mut on_error_sleep = Duration::ZERO;
        let mut last_error: Option<Error> = None;
        let mut url = String::new();

        let services = self.config_services().await?;

        for _ in 0..max_retries {
            let mut candidates = services.clone();
            candidates.shuffle(&mut rand::thread_rng());
            if let Some(preferred) = self.long_poll_service.lock().take() {
                candidates.insert(0, preferred);
            }

            for service in candidates {
                if !on_error_sleep.is_zero() {
                    warn!(
                        "load config failed, will retry in {:?}. appId: {}, cluster: {}, namespace: {}",
                        on_error_sleep, self.settings.app_id, self.settings.cluster, self.namespace
                    );
                    sleep(on_error_sleep).await;
                }

                url = self.assemble_query_url(&service.homepage_url, previous.map(|p| p.as_ref()))?;
                debug!("loading config from {}", url);

                let started = Instant::now();
                let outcome = self.query(&url).await;
                CONFIG_FETCH_DURATION_MS
                    .with_label_values(&[&self.namespace])
                    .observe(started.elapsed().as_secs_f64() * 1000.0);

                match outcome {
                    Ok(fetched) => {
                        self.force_refresh.store(false, Ordering::Release);
                        policy.success();
                        match (fetched, previous) {
                            (Some(snapshot), _) => {
                                self.count_fetch("ok");
                                return Ok(Arc::new(snapshot));
                            }
                            (None, Some(previous)) => {
                                debug!("config service responded 304 for {}", self.namespace);
                                self.count_fetch("not_modified");
                                return Ok(previous.clone());
                            }
                            (None, None) => {
                                self.count_fetch("error");
                                last_error = Some(
                                    NetworkError::UnexpectedStatus {
                                        status: 304,
                                        url: url.clone(),
                                    }
                                    .into(),
                                );
                            }
                        }
                    }
                    Err(e) => {
                        self.count_fetch(if e.is_not_released() { "not_found" } else { "error" });
                        debug!("fetch from {} failed: {}", url, e);
                        last_error = Some(e);
                    }
                }

                on_error_sleep = if self.force_refresh.load(Ordering::Acquire) {
                    self.settings.on_error_retry_interval()
                } else {
                    policy.fail()
                };
            }
        }

        Err(ClientError::LoadFailed {
            namespace: self.namespace.clone(),
            url,
            source: Box::new(last_error.unwrap_or_else(|| ClientError::NoConfigService.into())),
        }
        .into())
    }

    /// `Ok(None)` means `304`.
    async fn query(
        &self,
        url: &str,
    ) -> Result<Option<ReleaseSnapshot>> {
        let headers = signed_headers(url, &self.settings.app_id, self.settings.access_key_secret.as_deref())?;
        let request = HttpRequest::get(url, self.settings.read_timeout()).with_headers(headers);
        let response = self.http.get(request).await?;

        match response.status {
            200 => {
                let body: ConfigResponse = response.json()?;
                Ok(Some(ReleaseSnapshot::from_response(body)))
            }
            304 => Ok(None),
            404 => Err(ClientError::NotReleased {
                app_id: self.settings.app_id.clone(),
                cluster: self.settings.cluster.clone(),
                namespace: self.namespace.clone(),
            }
            .into()),
            status => Err(NetworkError::UnexpectedStatus {
                status,
                url: url.to_string(),
            }
            .into()),
        }
    }

    async fn config_services(&self) -> Result<Vec<ServiceAddress>> {
        let services = self.locator.config_services().await?;
        if services.is_empty() {
            return Err(ClientError::NoConfigService.into());
        }
        Ok(services)
    }

    pub(crate) fn assemble_query_url(
        &self,
        homepage_url: &str,
        previous: Option<&ReleaseSnapshot>,
    ) -> Result<String> {
        let base = join_url(homepage_url, "configs");
        let mut url = Url::parse(&base).map_err(|e| NetworkError::InvalidUrl(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| NetworkError::InvalidUrl(base.clone()))?
            .extend([
                self.settings.app_id.as_str(),
                self.settings.cluster.as_str(),
                self.namespace.as_str(),
            ]);

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(previous) = previous {
            query.push(("releaseKey", previous.release_key().to_string()));
        }
        if let Some(data_center) = self.settings.data_center.as_deref().filter(|s| !s.is_empty()) {
            query.push(("dataCenter", data_center.to_string()));
        }
        if let Some(ip) = self.settings.local_ip.as_deref().filter(|s| !s.is_empty()) {
            query.push(("ip", ip.to_string()));
        }
        if let Some(messages) = self.remote_messages.lock().as_ref() {
            query.push(("messages", serde_json::to_string(messages)?));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }

    fn count_fetch(
        &self,
        outcome: &str,
    ) {
        CONFIG_FETCH_TOTAL
            .with_label_values(&[&self.namespace, outcome])
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn is_force_refresh_pending(&self) -> bool {
        self.force_refresh.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ConfigRepository for RemoteConfigRepository {
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

    fn source_type(&self) -> SourceKind {
        SourceKind::Remote
    }
}

impl LongPollListener for RemoteConfigRepository {
    fn on_long_poll_notified(
        &self,
        service: &ServiceAddress,
        messages: Option<NotificationMessages>,
    ) {
        *self.long_poll_service.lock() = Some(service.clone());
        *self.remote_messages.lock() = messages;
        self.force_refresh();
    }
}
