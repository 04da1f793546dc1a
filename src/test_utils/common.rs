use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::ConfigChangeEvent;
use crate::model::ReleaseSnapshot;
use crate::model::SourceKind;
use crate::ClientSettings;
use crate::ConfigChangeListener;

pub fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn remote_snapshot(
    namespace: &str,
    release_key: &str,
    pairs: &[(&str, &str)],
) -> Arc<ReleaseSnapshot> {
    Arc::new(ReleaseSnapshot::new(namespace, release_key, map(pairs), SourceKind::Remote))
}

/// Fast settings against a single fake config service.
pub fn test_settings() -> ClientSettings {
    ClientSettings {
        app_id: "someApp".to_string(),
        cluster: "default".to_string(),
        data_center: None,
        local_ip: None,
        config_services: vec!["http://config-a:8080".to_string()],
        load_config_qps: 1000.0,
        long_poll_qps: 1000.0,
        on_error_retry_interval_ms: 100,
        long_poll_initial_delay_ms: 0,
        refresh_interval_ms: 60_000,
        ..Default::default()
    }
}

pub fn config_response_body(
    namespace: &str,
    release_key: &str,
    pairs: &[(&str, &str)],
) -> String {
    serde_json::json!({
        "appId": "someApp",
        "cluster": "default",
        "namespaceName": namespace,
        "releaseKey": release_key,
        "configurations": map(pairs),
    })
    .to_string()
}

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ConfigChangeEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ConfigChangeEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl ConfigChangeListener for RecordingListener {
    fn on_change(
        &self,
        event: &ConfigChangeEvent,
    ) {
        self.events.lock().push(event.clone());
    }
}
