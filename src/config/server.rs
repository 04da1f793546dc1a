use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::constants::CLEAN_BATCH_SIZE;
use crate::constants::CLEAN_QUEUE_MAX_SIZE;
use crate::Result;

/// Config-service settings
///
/// # Defaults
/// Field-level defaults use helper functions prefixed with `default_`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    /// Network listening address (IP:PORT)
    ///
    /// Default: 127.0.0.1:8080
    #[serde(default = "default_listen_addr")]
    pub listen_address: SocketAddr,

    /// Homepage URLs this service hands out on `/services/config`
    #[serde(default = "default_advertised_urls")]
    pub advertised_urls: Vec<String>,

    /// Sled database directory; an in-memory store is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// How long a long-poll request is held before answering "not modified"
    ///
    /// Default: 60 seconds
    #[serde(default = "default_hold_timeout_ms")]
    pub hold_timeout_ms: u64,

    /// Release-message scan period
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    #[serde(default = "default_cleanup_queue_capacity")]
    pub cleanup_queue_capacity: usize,

    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: usize,

    /// Prometheus endpoint port; disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_address: default_listen_addr(),
            advertised_urls: default_advertised_urls(),
            db_path: None,
            hold_timeout_ms: default_hold_timeout_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            cleanup_queue_capacity: default_cleanup_queue_capacity(),
            cleanup_batch_size: default_cleanup_batch_size(),
            metrics_port: None,
        }
    }
}

impl ServerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.hold_timeout_ms == 0 {
            return Err(invalid("server.hold_timeout_ms must be positive"));
        }
        if self.scan_interval_ms == 0 {
            return Err(invalid("server.scan_interval_ms must be positive"));
        }
        if self.cleanup_queue_capacity == 0 || self.cleanup_batch_size == 0 {
            return Err(invalid("server cleanup queue capacity and batch size must be positive"));
        }
        Ok(())
    }

    pub fn hold_timeout(&self) -> Duration {
        Duration::from_millis(self.hold_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}
fn default_advertised_urls() -> Vec<String> {
    vec!["http://127.0.0.1:8080".to_string()]
}
fn default_hold_timeout_ms() -> u64 {
    60_000
}
fn default_scan_interval_ms() -> u64 {
    1000
}
fn default_cleanup_queue_capacity() -> usize {
    CLEAN_QUEUE_MAX_SIZE
}
fn default_cleanup_batch_size() -> usize {
    CLEAN_BATCH_SIZE
}
