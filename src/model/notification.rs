use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::CLUSTER_NAMESPACE_SEPARATOR;

/// `(namespace, id)` pair exchanged on the long-poll endpoint.
///
/// Clients send the highest id they have seen per namespace; the server
/// answers with the namespaces whose id advanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub namespace_name: String,
    pub notification_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<NotificationMessages>,
}

impl Notification {
    pub fn new(
        namespace_name: impl Into<String>,
        notification_id: i64,
    ) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
            messages: None,
        }
    }
}

/// Per-watch-key release-message ids that explain why a notification fired.
///
/// Forwarded by the client on its next fetch so the server can tell which
/// release the client is chasing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessages {
    #[serde(default)]
    pub details: BTreeMap<String, i64>,
}

impl NotificationMessages {
    pub fn put(
        &mut self,
        key: impl Into<String>,
        id: i64,
    ) {
        self.details.insert(key.into(), id);
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<i64> {
        self.details.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Folds `other` in, keeping the larger id per key.
    pub fn merge_from(
        &mut self,
        other: &NotificationMessages,
    ) {
        for (key, id) in &other.details {
            let entry = self.details.entry(key.clone()).or_insert(*id);
            if *id > *entry {
                *entry = *id;
            }
        }
    }
}

/// Topic under which releases of one namespace are announced:
/// `{appId}+{cluster}+{namespace}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey {
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
}

impl WatchKey {
    pub fn new(
        app_id: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
        }
    }

    /// Parses `{appId}+{cluster}+{namespace}`; the namespace may itself contain `+`.
    pub fn parse(topic: &str) -> Option<Self> {
        let mut parts = topic.splitn(3, CLUSTER_NAMESPACE_SEPARATOR);
        let app_id = parts.next().filter(|s| !s.is_empty())?;
        let cluster = parts.next().filter(|s| !s.is_empty())?;
        let namespace = parts.next().filter(|s| !s.is_empty())?;
        Some(Self::new(app_id, cluster, namespace))
    }
}

impl fmt::Display for WatchKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.app_id,
            self.cluster,
            self.namespace,
            sep = CLUSTER_NAMESPACE_SEPARATOR
        )
    }
}
