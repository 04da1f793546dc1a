use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Persisted marker announcing that `topic` has a new release.
///
/// Append-only: rows are deleted once a newer marker for the same topic
/// exists, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMessage {
    /// Strictly increasing, assigned by the store
    pub id: u64,
    /// Watch key of the released namespace
    pub topic: String,
    pub created_at_ms: u64,
}

/// Latest released values of one namespace, kept by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub topic: String,
    pub release_key: String,
    pub configurations: BTreeMap<String, String>,
    pub created_at_ms: u64,
}
