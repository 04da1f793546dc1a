use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::load_resource;
use super::ConfigRepository;
use super::EnvironmentSource;
use super::MapSource;
use super::PropertySource;
use super::RepositoryChangeListener;
use crate::constants::WARN_LOG_PER_SECOND;
use crate::model::calc_property_changes;
use crate::model::ChangeType;
use crate::model::ConfigChange;
use crate::model::ConfigChangeEvent;
use crate::model::ReleaseSnapshot;
use crate::model::SourceKind;
use crate::rate_limit::RateLimiter;
use crate::CONFIG_CHANGE_EVENTS;

/// Callback for effective value changes of one namespace.
pub trait ConfigChangeListener: Send + Sync + 'static {
    fn on_change(
        &self,
        event: &ConfigChangeEvent,
    );
}

impl<F> ConfigChangeListener for F
where
    F: Fn(&ConfigChangeEvent) + Send + Sync + 'static,
{
    fn on_change(
        &self,
        event: &ConfigChangeEvent,
    ) {
        self(event)
    }
}

struct ListenerEntry {
    listener: Arc<dyn ConfigChangeListener>,
    /// `None` means every key
    interested_keys: Option<BTreeSet<String>>,
}

/// Precedence-resolving view of one namespace.
///
/// Lookup order, first match wins:
/// 1. process-level overrides
/// 2. the repository snapshot
/// 3. the process environment
/// 4. bundled `{namespace}.properties` defaults
/// 5. the caller's default
///
/// Lookups are lock-free. Snapshot updates run the two-pass diff under
/// `update_lock` so listeners only hear about changes of the effective value.
pub struct DefaultConfig {
    namespace: String,
    repository: Arc<dyn ConfigRepository>,
    overrides: Arc<dyn PropertySource>,
    environment: Arc<dyn PropertySource>,
    resources: Option<ReleaseSnapshot>,

    cache: ArcSwapOption<ReleaseSnapshot>,
    update_lock: Mutex<()>,
    listeners: RwLock<Vec<ListenerEntry>>,
    warn_limiter: RateLimiter,
}

pub struct DefaultConfigBuilder {
    namespace: String,
    repository: Arc<dyn ConfigRepository>,
    overrides: Arc<dyn PropertySource>,
    environment: Arc<dyn PropertySource>,
    resource_dir: Option<PathBuf>,
}

impl DefaultConfigBuilder {
    pub fn overrides(
        mut self,
        overrides: Arc<dyn PropertySource>,
    ) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn environment(
        mut self,
        environment: Arc<dyn PropertySource>,
    ) -> Self {
        self.environment = environment;
        self
    }

    pub fn resource_dir(
        mut self,
        dir: Option<PathBuf>,
    ) -> Self {
        self.resource_dir = dir;
        self
    }

    /// Loads the initial snapshot and subscribes to the repository.
    ///
    /// An unavailable repository is logged, not returned: the facade serves
    /// defaults until the repository recovers and publishes.
    pub async fn build(self) -> Arc<DefaultConfig> {
        let resources = self
            .resource_dir
            .as_deref()
            .and_then(|dir| load_resource(dir, &self.namespace));

        let config = Arc::new(DefaultConfig {
            namespace: self.namespace,
            repository: self.repository,
            overrides: self.overrides,
            environment: self.environment,
            resources,
            cache: ArcSwapOption::empty(),
            update_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            warn_limiter: RateLimiter::new(WARN_LOG_PER_SECOND),
        });

        match config.repository.get_snapshot().await {
            Ok(snapshot) => config.cache.store(Some(snapshot)),
            Err(e) => warn!(
                "init local config failed - namespace: {}, reason: {}",
                config.namespace, e
            ),
        }

        // registered either way so a later recovery still reaches us
        let weak = Arc::downgrade(&config) as Weak<dyn RepositoryChangeListener>;
        config.repository.add_change_listener(weak);

        // a publish between the first load and the subscription would be lost
        if let Some(latest) = config.repository.current() {
            let seen = config.cache.load_full();
            if !seen.map(|s| Arc::ptr_eq(&s, &latest)).unwrap_or(false) {
                config.apply_snapshot(latest);
            }
        }
        config
    }
}

impl std::fmt::Debug for DefaultConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DefaultConfig")
            .field("namespace", &self.namespace)
            .field("source", &self.source_type())
            .finish()
    }
}

impl DefaultConfig {
    pub fn builder(
        namespace: impl Into<String>,
        repository: Arc<dyn ConfigRepository>,
    ) -> DefaultConfigBuilder {
        DefaultConfigBuilder {
            namespace: namespace.into(),
            repository,
            overrides: Arc::new(MapSource::new()),
            environment: Arc::new(EnvironmentSource),
            resource_dir: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Effective value of `key`, or `None` when no layer has it.
    pub fn property(
        &self,
        key: &str,
    ) -> Option<String> {
        let value = self.resolve(key);
        if value.is_none() && self.cache.load().is_none() && self.warn_limiter.try_acquire() {
            warn!(
                "could not load config for namespace {}, please check whether the configs are released! return default value now",
                self.namespace
            );
        }
        value
    }

    pub fn get_property(
        &self,
        key: &str,
        default: &str,
    ) -> String {
        self.property(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int_property(
        &self,
        key: &str,
        default: i64,
    ) -> i64 {
        self.parse_property(key, default, |v| v.trim().parse::<i64>().ok())
    }

    pub fn get_bool_property(
        &self,
        key: &str,
        default: bool,
    ) -> bool {
        self.parse_property(key, default, |v| match v.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        })
    }

    /// Splits the value on `delimiter`, trimming items and dropping empty ones.
    pub fn get_array_property(
        &self,
        key: &str,
        delimiter: &str,
        default: &[&str],
    ) -> Vec<String> {
        match self.property(key) {
            Some(value) => value
                .split(delimiter)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Keys of the current repository snapshot.
    pub fn property_names(&self) -> BTreeSet<String> {
        self.cache
            .load_full()
            .map(|s| s.values().keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn source_type(&self) -> SourceKind {
        self.cache.load_full().map(|s| s.source()).unwrap_or_default()
    }

    pub fn add_change_listener(
        &self,
        listener: Arc<dyn ConfigChangeListener>,
    ) {
        self.push_listener(listener, None);
    }

    /// Registers `listener` for events touching `keys` only; events are
    /// narrowed to those keys.
    pub fn add_change_listener_for_keys<I, S>(
        &self,
        listener: Arc<dyn ConfigChangeListener>,
        keys: I,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        self.push_listener(listener, Some(keys));
    }

    pub fn remove_change_listener(
        &self,
        listener: &Arc<dyn ConfigChangeListener>,
    ) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| !same_listener(&entry.listener, listener));
        listeners.len() != before
    }

    fn push_listener(
        &self,
        listener: Arc<dyn ConfigChangeListener>,
        interested_keys: Option<BTreeSet<String>>,
    ) {
        let mut listeners = self.listeners.write();
        if listeners
            .iter()
            .any(|entry| same_listener(&entry.listener, &listener))
        {
            return;
        }
        listeners.push(ListenerEntry {
            listener,
            interested_keys,
        });
    }

    fn parse_property<T: Copy>(
        &self,
        key: &str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> T {
        match self.property(key) {
            Some(raw) => parse(&raw).unwrap_or_else(|| {
                warn!(
                    "value {:?} of {} in namespace {} is not parsable, returning default",
                    raw, key, self.namespace
                );
                default
            }),
            None => default,
        }
    }

    fn resolve(
        &self,
        key: &str,
    ) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value);
        }
        if let Some(snapshot) = self.cache.load_full() {
            if let Some(value) = snapshot.get(key) {
                return Some(value.to_string());
            }
        }
        if let Some(value) = self.environment.get(key) {
            return Some(value);
        }
        self.resources
            .as_ref()
            .and_then(|r| r.get(key))
            .map(str::to_string)
    }

    /// Swaps in `snapshot` and notifies listeners of effective changes.
    fn apply_snapshot(
        &self,
        snapshot: Arc<ReleaseSnapshot>,
    ) {
        let event = {
            let _guard = self.update_lock.lock();
            let previous = self.cache.load_full();

            if let Some(previous) = &previous {
                if previous.values() == snapshot.values() {
                    self.cache.store(Some(snapshot));
                    return;
                }
            }

            let empty = BTreeMap::new();
            let old_values = previous.as_ref().map(|p| p.values()).unwrap_or(&empty);
            let mut changes = calc_property_changes(&self.namespace, old_values, snapshot.values());

            // resolved against the outgoing snapshot
            for change in &mut changes {
                let raw_old = change.old_value.take();
                change.old_value = self.resolve(&change.property_name).or(raw_old);
            }

            self.cache.store(Some(snapshot));

            let mut actual = BTreeMap::new();
            for mut change in changes {
                let raw_new = change.new_value.take();
                change.new_value = self.resolve(&change.property_name).or(raw_new);
                if let Some(change) = reconcile(change) {
                    actual.insert(change.property_name.clone(), change);
                }
            }

            if actual.is_empty() {
                debug!(namespace = %self.namespace, "snapshot replaced without effective changes");
                return;
            }
            ConfigChangeEvent::new(self.namespace.clone(), actual)
        };

        info!(
            namespace = %self.namespace,
            keys = ?event.changed_keys(),
            "config changed"
        );
        CONFIG_CHANGE_EVENTS
            .with_label_values(&[&self.namespace])
            .inc();
        self.fire(&event);
    }

    fn fire(
        &self,
        event: &ConfigChangeEvent,
    ) {
        let targets: Vec<(Arc<dyn ConfigChangeListener>, Option<BTreeSet<String>>)> = self
            .listeners
            .read()
            .iter()
            .map(|entry| (entry.listener.clone(), entry.interested_keys.clone()))
            .collect();

        for (listener, keys) in targets {
            match keys {
                None => listener.on_change(event),
                Some(keys) => {
                    if let Some(filtered) = event.filter_keys(&keys) {
                        listener.on_change(&filtered);
                    }
                }
            }
        }
    }
}

impl RepositoryChangeListener for DefaultConfig {
    fn on_repository_change(
        &self,
        _namespace: &str,
        snapshot: Arc<ReleaseSnapshot>,
    ) {
        self.apply_snapshot(snapshot);
    }
}

/// Reclassifies a raw change using effective values; `None` when the change
/// is invisible after precedence resolution.
pub(crate) fn reconcile(mut change: ConfigChange) -> Option<ConfigChange> {
    if change.old_value == change.new_value {
        return None;
    }
    match change.change_type {
        ChangeType::Added if change.old_value.is_some() => {
            change.change_type = ChangeType::Modified;
        }
        ChangeType::Deleted if change.new_value.is_some() => {
            change.change_type = ChangeType::Modified;
        }
        _ => {}
    }
    Some(change)
}

fn same_listener(
    a: &Arc<dyn ConfigChangeListener>,
    b: &Arc<dyn ConfigChangeListener>,
) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
