use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::constants::DEFAULT_CLUSTER;
use crate::constants::RATE_LIMIT_ACQUIRE_TIMEOUT_MS;
use crate::net::local_ip;
use crate::Result;

/// Client-side settings: identity, discovery, timeouts and retry pacing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientSettings {
    /// Application identity sent on every request
    ///
    /// Default: `SampleApp`
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Default: `default`
    #[serde(default = "default_cluster")]
    pub cluster: String,

    #[serde(default)]
    pub data_center: Option<String>,

    /// Reported to the server for gray-release targeting
    ///
    /// Default: first non-loopback address, if any
    #[serde(default = "local_ip")]
    pub local_ip: Option<String>,

    /// Static list of config-service homepage URLs, used when no meta server is set
    #[serde(default = "default_config_services")]
    pub config_services: Vec<String>,

    /// When set, config-service addresses are discovered from `{meta_server}/services/config`
    #[serde(default)]
    pub meta_server: Option<String>,

    /// Shared secret; enables request signature headers
    #[serde(default)]
    pub access_key_secret: Option<String>,

    /// Backstop refresh period per namespace
    ///
    /// Default: 5 minutes
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Fetches per second allowed per namespace repository
    #[serde(default = "default_qps")]
    pub load_config_qps: f64,

    /// Long-poll calls per second allowed per process
    #[serde(default = "default_qps")]
    pub long_poll_qps: f64,

    /// Lower backoff bound; the upper bound is 8x this
    #[serde(default = "default_on_error_retry_interval_ms")]
    pub on_error_retry_interval_ms: u64,

    #[serde(default = "default_long_poll_initial_delay_ms")]
    pub long_poll_initial_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout of a regular fetch
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Must exceed the server's hold timeout
    #[serde(default = "default_long_poll_timeout_ms")]
    pub long_poll_timeout_ms: u64,

    #[serde(default = "default_rate_limit_acquire_timeout_ms")]
    pub rate_limit_acquire_timeout_ms: u64,

    /// Directory of the on-disk snapshot cache; disabled when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Directory holding bundled `{namespace}.properties` defaults
    #[serde(default)]
    pub resource_dir: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            cluster: default_cluster(),
            data_center: None,
            local_ip: local_ip(),
            config_services: default_config_services(),
            meta_server: None,
            access_key_secret: None,
            refresh_interval_ms: default_refresh_interval_ms(),
            load_config_qps: default_qps(),
            long_poll_qps: default_qps(),
            on_error_retry_interval_ms: default_on_error_retry_interval_ms(),
            long_poll_initial_delay_ms: default_long_poll_initial_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            long_poll_timeout_ms: default_long_poll_timeout_ms(),
            rate_limit_acquire_timeout_ms: default_rate_limit_acquire_timeout_ms(),
            cache_dir: None,
            resource_dir: None,
        }
    }
}

impl ClientSettings {
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(invalid("client.app_id must not be empty"));
        }
        if self.cluster.trim().is_empty() {
            return Err(invalid("client.cluster must not be empty"));
        }
        if self.meta_server.is_none() && self.config_services.is_empty() {
            return Err(invalid(
                "client.config_services must list at least one address when no meta_server is set",
            ));
        }
        let positive = |qps: f64| qps.is_finite() && qps > 0.0;
        if !positive(self.load_config_qps) || !positive(self.long_poll_qps) {
            return Err(invalid("client qps limits must be positive"));
        }
        if self.on_error_retry_interval_ms == 0 {
            return Err(invalid("client.on_error_retry_interval_ms must be positive"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(invalid("client.refresh_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Never zero: timers built from it panic on a zero period.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn on_error_retry_interval(&self) -> Duration {
        Duration::from_millis(self.on_error_retry_interval_ms)
    }

    /// Backoff cap shared by fetches and the long poll.
    pub fn on_error_retry_interval_cap(&self) -> Duration {
        self.on_error_retry_interval() * 8
    }

    pub fn long_poll_initial_delay(&self) -> Duration {
        Duration::from_millis(self.long_poll_initial_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }

    pub fn rate_limit_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.rate_limit_acquire_timeout_ms)
    }
}

fn default_app_id() -> String {
    "SampleApp".to_string()
}
fn default_cluster() -> String {
    DEFAULT_CLUSTER.to_string()
}
fn default_config_services() -> Vec<String> {
    vec!["http://127.0.0.1:8080".to_string()]
}
fn default_refresh_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_qps() -> f64 {
    2.0
}
fn default_on_error_retry_interval_ms() -> u64 {
    1000
}
fn default_long_poll_initial_delay_ms() -> u64 {
    2000
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_long_poll_timeout_ms() -> u64 {
    90_000
}
fn default_rate_limit_acquire_timeout_ms() -> u64 {
    RATE_LIMIT_ACQUIRE_TIMEOUT_MS
}
