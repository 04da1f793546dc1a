use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Where a snapshot's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceKind {
    /// Fetched from a config service
    Remote,
    /// Loaded from the client's on-disk cache
    LocalFile,
    /// Bundled with the application
    LocalResource,
    #[default]
    None,
}

impl fmt::Display for SourceKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            SourceKind::Remote => "remote",
            SourceKind::LocalFile => "local_file",
            SourceKind::LocalResource => "local_resource",
            SourceKind::None => "none",
        };
        f.write_str(s)
    }
}

/// One immutable release of a namespace as seen by a client.
///
/// Repositories never mutate a snapshot; they publish a new `Arc<ReleaseSnapshot>`
/// instead, so readers holding the old one are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSnapshot {
    namespace: String,
    release_key: String,
    values: BTreeMap<String, String>,
    source: SourceKind,
}

impl ReleaseSnapshot {
    pub fn new(
        namespace: impl Into<String>,
        release_key: impl Into<String>,
        values: BTreeMap<String, String>,
        source: SourceKind,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            release_key: release_key.into(),
            values,
            source,
        }
    }

    pub fn from_response(response: ConfigResponse) -> Self {
        Self::new(
            response.namespace_name,
            response.release_key,
            response.configurations,
            SourceKind::Remote,
        )
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Cache validator sent back on conditional fetches.
    pub fn release_key(&self) -> &str {
        &self.release_key
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }
}

/// Body of a `200` reply to `GET /configs/{appId}/{cluster}/{namespace}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub cluster: String,
    pub namespace_name: String,
    #[serde(default)]
    pub configurations: BTreeMap<String, String>,
    pub release_key: String,
}
