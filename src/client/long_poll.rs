use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use super::signed_headers;
use super::HttpClient;
use super::HttpRequest;
use super::LongPollListener;
use super::ServiceLocator;
use crate::constants::INIT_NOTIFICATION_ID;
use crate::model::Notification;
use crate::model::NotificationMessages;
use crate::model::ServiceAddress;
use crate::net::join_url;
use crate::rate_limit::RateLimiter;
use crate::schedule::ExponentialSchedulePolicy;
use crate::schedule::SchedulePolicy;
use crate::ClientError;
use crate::ClientSettings;
use crate::NetworkError;
use crate::Result;
use crate::LONG_POLL_TOTAL;

/// Result of one long-poll round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Server answered `304` after its hold timeout
    NotModified,
    /// Namespaces whose notification id advanced, already dispatched
    Changed(Vec<Notification>),
}

/// The single long-poll connection of a client process.
///
/// Every registered namespace rides on the same request together with the
/// highest notification id seen for it. When the server reports an advance,
/// each repository registered for that namespace is told which address
/// answered and is forced to refresh.
pub struct LongPollClient {
    settings: Arc<ClientSettings>,
    http: Arc<dyn HttpClient>,
    locator: Arc<dyn ServiceLocator>,

    listeners: DashMap<String, Vec<Arc<dyn LongPollListener>>>,
    notifications: DashMap<String, i64>,
    remote_messages: DashMap<String, NotificationMessages>,

    rate_limiter: RateLimiter,
    policy: Mutex<ExponentialSchedulePolicy>,
    /// Address reused by the next poll; cleared on failure and, half the
    /// time, after a `304` to spread load
    last_service: Mutex<Option<ServiceAddress>>,
    started: AtomicBool,
}

impl std::fmt::Debug for LongPollClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LongPollClient")
            .field("namespaces", &self.notifications.len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl LongPollClient {
    pub fn new(
        settings: Arc<ClientSettings>,
        http: Arc<dyn HttpClient>,
        locator: Arc<dyn ServiceLocator>,
    ) -> Self {
        let policy = ExponentialSchedulePolicy::new(
            settings.on_error_retry_interval(),
            settings.on_error_retry_interval_cap(),
        );
        let rate_limiter = RateLimiter::new(settings.long_poll_qps);
        Self {
            settings,
            http,
            locator,
            listeners: DashMap::new(),
            notifications: DashMap::new(),
            remote_messages: DashMap::new(),
            rate_limiter,
            policy: Mutex::new(policy),
            last_service: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Adds `listener` for `namespace`. Registering the same listener twice
    /// is a no-op and returns `false`.
    pub fn register(
        &self,
        namespace: &str,
        listener: Arc<dyn LongPollListener>,
    ) -> bool {
        let added = {
            let mut entry = self.listeners.entry(namespace.to_string()).or_default();
            if entry.iter().any(|l| same_listener(l, &listener)) {
                false
            } else {
                entry.push(listener);
                true
            }
        };
        self.notifications
            .entry(namespace.to_string())
            .or_insert(INIT_NOTIFICATION_ID);
        if added {
            debug!("namespace {} registered for long polling", namespace);
        }
        added
    }

    /// Highest notification id seen for `namespace`.
    pub fn notification_id(
        &self,
        namespace: &str,
    ) -> Option<i64> {
        self.notifications.get(namespace).map(|id| *id)
    }

    pub fn listener_count(
        &self,
        namespace: &str,
    ) -> usize {
        self.listeners.get(namespace).map(|l| l.len()).unwrap_or(0)
    }

    /// Spawns the poll loop once; later calls return `None`.
    pub fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            return None;
        }
        let client = self.clone();
        Some(tokio::spawn(async move {
            client.run(cancel).await;
        }))
    }

    async fn run(
        &self,
        cancel: CancellationToken,
    ) {
        let initial_delay = self.settings.long_poll_initial_delay();
        info!("long polling starts in {:?}", initial_delay);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(initial_delay) => {}
        }

        loop {
            let delay = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => match outcome {
                    Ok(_) => None,
                    Err(e) => {
                        let delay = self.policy.lock().fail();
                        warn!("long polling failed, will retry in {:?}. reason: {}", delay, e);
                        Some(delay)
                    }
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
        }
        info!("long polling stopped");
    }

    /// One rate-limited round trip, including dispatch to listeners.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let acquire_timeout = self.settings.rate_limit_acquire_timeout();
        if !self.rate_limiter.acquire_timeout(acquire_timeout).await {
            sleep(acquire_timeout).await;
        }

        let result = self.request().await;
        match result {
            Ok(outcome) => {
                self.policy.lock().success();
                Ok(outcome)
            }
            Err(e) => {
                *self.last_service.lock() = None;
                LONG_POLL_TOTAL.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    async fn request(&self) -> Result<PollOutcome> {
        let service = self.pick_service().await?;
        let url = self.assemble_long_poll_url(&service.homepage_url)?;
        debug!("long polling from {}", url);

        let headers = signed_headers(&url, &self.settings.app_id, self.settings.access_key_secret.as_deref())?;
        let request = HttpRequest::get(url.clone(), self.settings.long_poll_timeout()).with_headers(headers);
        let response = self.http.get(request).await?;

        match response.status {
            200 => {
                let notifications: Vec<Notification> = response.json()?;
                let advanced = self.record_notifications(&notifications);
                LONG_POLL_TOTAL.with_label_values(&["changed"]).inc();
                self.notify(&service, &advanced);
                Ok(PollOutcome::Changed(advanced))
            }
            304 => {
                LONG_POLL_TOTAL.with_label_values(&["not_modified"]).inc();
                if rand::thread_rng().gen_bool(0.5) {
                    *self.last_service.lock() = None;
                }
                Ok(PollOutcome::NotModified)
            }
            status => Err(NetworkError::UnexpectedStatus { status, url }.into()),
        }
    }

    async fn pick_service(&self) -> Result<ServiceAddress> {
        let cached = self.last_service.lock().clone();
        if let Some(service) = cached {
            return Ok(service);
        }
        let services = self.locator.config_services().await?;
        let service = services
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ClientError::NoConfigService)?;
        *self.last_service.lock() = Some(service.clone());
        Ok(service)
    }

    /// Updates tracked ids and messages; returns only the notifications
    /// whose id actually advanced.
    fn record_notifications(
        &self,
        notifications: &[Notification],
    ) -> Vec<Notification> {
        let mut advanced = Vec::new();
        for notification in notifications {
            let namespace = &notification.namespace_name;
            let Some(mut known) = self.notifications.get_mut(namespace) else {
                debug!("ignoring notification for unregistered namespace {}", namespace);
                continue;
            };

            if let Some(messages) = &notification.messages {
                self.remote_messages
                    .entry(namespace.clone())
                    .or_default()
                    .merge_from(messages);
            }

            if notification.notification_id > *known {
                *known = notification.notification_id;
                advanced.push(notification.clone());
            }
        }
        advanced
    }

    fn notify(
        &self,
        service: &ServiceAddress,
        notifications: &[Notification],
    ) {
        for notification in notifications {
            let namespace = &notification.namespace_name;
            let targets: Vec<Arc<dyn LongPollListener>> = self
                .listeners
                .get(namespace)
                .map(|l| l.clone())
                .unwrap_or_default();
            let messages = self.remote_messages.get(namespace).map(|m| m.clone());

            for listener in targets {
                listener.on_long_poll_notified(service, messages.clone());
            }
        }
    }

    pub(crate) fn assemble_long_poll_url(
        &self,
        homepage_url: &str,
    ) -> Result<String> {
        let base = join_url(homepage_url, "notifications/v2");
        let mut url = Url::parse(&base).map_err(|e| NetworkError::InvalidUrl(format!("{base}: {e}")))?;

        let tracked: BTreeMap<String, i64> = self
            .notifications
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let notifications: Vec<Notification> = tracked
            .into_iter()
            .map(|(namespace, id)| Notification::new(namespace, id))
            .collect();

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("cluster", &self.settings.cluster);
            query.append_pair("appId", &self.settings.app_id);
            query.append_pair("notifications", &serde_json::to_string(&notifications)?);
            if let Some(data_center) = self.settings.data_center.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("dataCenter", data_center);
            }
            if let Some(ip) = self.settings.local_ip.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("ip", ip);
            }
        }
        Ok(url.into())
    }
}

fn same_listener(
    a: &Arc<dyn LongPollListener>,
    b: &Arc<dyn LongPollListener>,
) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
