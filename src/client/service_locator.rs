use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use super::signed_headers;
use super::HttpClient;
use super::HttpRequest;
use crate::model::ServiceAddress;
use crate::net::join_url;
use crate::ClientError;
use crate::ClientSettings;
use crate::NetworkError;
use crate::Result;

/// Source of interchangeable config-service endpoints.
///
/// Order carries no meaning; callers shuffle before use.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceLocator: Send + Sync + 'static {
    async fn config_services(&self) -> Result<Vec<ServiceAddress>>;
}

/// Fixed list from `client.config_services`.
#[derive(Debug, Clone)]
pub struct StaticServiceLocator {
    services: Vec<ServiceAddress>,
}

impl StaticServiceLocator {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: urls.into_iter().map(ServiceAddress::new).collect(),
        }
    }
}

#[async_trait]
impl ServiceLocator for StaticServiceLocator {
    async fn config_services(&self) -> Result<Vec<ServiceAddress>> {
        Ok(self.services.clone())
    }
}

/// Discovers config services from `{meta_server}/services/config`.
///
/// Lookups are served from the last non-empty answer; the meta server is
/// only asked inline while nothing is known yet. [`Self::run_periodic_refresh`]
/// keeps the list current in the background, and a failed refresh keeps the
/// previous list.
pub struct MetaServiceLocator {
    meta_server: String,
    app_id: String,
    local_ip: Option<String>,
    access_key_secret: Option<String>,
    timeout: Duration,
    refresh_interval: Duration,
    http: Arc<dyn HttpClient>,
    last_good: ArcSwap<Vec<ServiceAddress>>,
}

impl MetaServiceLocator {
    pub fn new(
        meta_server: impl Into<String>,
        settings: &ClientSettings,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            meta_server: meta_server.into(),
            app_id: settings.app_id.clone(),
            local_ip: settings.local_ip.clone(),
            access_key_secret: settings.access_key_secret.clone(),
            timeout: settings.read_timeout(),
            refresh_interval: settings.refresh_interval(),
            http,
            last_good: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn discovery_url(&self) -> Result<String> {
        let base = join_url(&self.meta_server, "services/config");
        let mut url =
            Url::parse(&base).map_err(|e| NetworkError::InvalidUrl(format!("{base}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("appId", &self.app_id);
            if let Some(ip) = &self.local_ip {
                query.append_pair("ip", ip);
            }
        }
        Ok(url.into())
    }

    async fn fetch(&self) -> Result<Vec<ServiceAddress>> {
        let url = self.discovery_url()?;
        let headers = signed_headers(&url, &self.app_id, self.access_key_secret.as_deref())?;
        let response = self
            .http
            .get(HttpRequest::get(url.clone(), self.timeout).with_headers(headers))
            .await?;
        if response.status != 200 {
            return Err(NetworkError::UnexpectedStatus {
                status: response.status,
                url,
            }
            .into());
        }
        response.json()
    }
}

impl std::fmt::Debug for MetaServiceLocator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MetaServiceLocator")
            .field("meta_server", &self.meta_server)
            .field("cached", &self.last_good.load().len())
            .finish()
    }
}

#[async_trait]
impl ServiceLocator for MetaServiceLocator {
    async fn config_services(&self) -> Result<Vec<ServiceAddress>> {
        let cached = self.last_good.load_full();
        if !cached.is_empty() {
            return Ok(cached.as_ref().clone());
        }
        self.refresh().await
    }
}

impl MetaServiceLocator {
    /// Asks the meta server now. A non-empty answer replaces the cached
    /// list; otherwise the cached list is returned, or the failure when
    /// nothing is cached.
    pub async fn refresh(&self) -> Result<Vec<ServiceAddress>> {
        match self.fetch().await {
            Ok(services) if !services.is_empty() => {
                debug!("discovered {} config services", services.len());
                self.last_good.store(Arc::new(services.clone()));
                Ok(services)
            }
            Ok(_) => {
                warn!("meta server {} returned no config service", self.meta_server);
                self.cached_or(ClientError::NoConfigService.into())
            }
            Err(e) => {
                warn!("meta server {} unreachable: {}", self.meta_server, e);
                self.cached_or(e)
            }
        }
    }

    /// Refreshes the cached list every `refresh_interval` until `cancel`
    /// fires. The first refresh happens one interval after the start.
    pub async fn run_periodic_refresh(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(
            "refreshing config services from {} every {:?}",
            self.meta_server, self.refresh_interval
        );
        let mut ticker = interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("config service refresh stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // failures are logged by refresh and the cached list stays
                    let _ = self.refresh().await;
                }
            }
        }
    }

    fn cached_or(
        &self,
        e: crate::Error,
    ) -> Result<Vec<ServiceAddress>> {
        let cached = self.last_good.load();
        if cached.is_empty() {
            Err(e)
        } else {
            Ok(cached.as_ref().clone())
        }
    }
}
