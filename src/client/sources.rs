//! Value sources layered by the [`DefaultConfig`](super::DefaultConfig) facade
//! around the repository snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use tracing::debug;
use tracing::error;

use crate::constants::PROPERTIES_EXTENSION;
use crate::model::ReleaseSnapshot;
use crate::model::SourceKind;
use crate::properties;

pub trait PropertySource: Send + Sync + 'static {
    fn get(
        &self,
        key: &str,
    ) -> Option<String>;
}

/// Process environment; keys are case sensitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentSource;

impl PropertySource for EnvironmentSource {
    fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mutable in-process map, used for process-level overrides such as
/// command-line properties.
#[derive(Debug, Default)]
pub struct MapSource {
    values: RwLock<BTreeMap<String, String>>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    /// Collects `-Dkey=value` and `--key=value` style arguments.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs: Vec<(String, String)> = args
            .into_iter()
            .filter_map(|arg| {
                let arg = arg.as_ref();
                let body = arg.strip_prefix("-D").or_else(|| arg.strip_prefix("--"))?;
                let (key, value) = body.split_once('=')?;
                if key.is_empty() {
                    None
                } else {
                    Some((key.to_string(), value.to_string()))
                }
            })
            .collect();
        Self::from_pairs(pairs)
    }

    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(
        &self,
        key: &str,
    ) -> Option<String> {
        self.values.write().remove(key)
    }
}

impl PropertySource for MapSource {
    fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Loads `{dir}/{namespace}.properties`; a missing file is not an error.
pub fn load_resource(
    dir: &Path,
    namespace: &str,
) -> Option<ReleaseSnapshot> {
    let path = dir.join(format!("{namespace}.{PROPERTIES_EXTENSION}"));
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            debug!("loaded bundled defaults from {}", path.display());
            Some(ReleaseSnapshot::new(
                namespace,
                "",
                properties::parse(&content),
                SourceKind::LocalResource,
            ))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            error!("load resource config for namespace {} failed: {}", namespace, e);
            None
        }
    }
}
