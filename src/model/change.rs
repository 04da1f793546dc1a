use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Kind of a single property change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// One property whose effective value changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub namespace: String,
    pub property_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_type: ChangeType,
}

impl ConfigChange {
    pub fn new(
        namespace: impl Into<String>,
        property_name: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        change_type: ChangeType,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            property_name: property_name.into(),
            old_value,
            new_value,
            change_type,
        }
    }
}

/// Raw key-level diff between two value maps.
///
/// Keys only in `new` are `Added`, keys in both with different values are
/// `Modified`, keys only in `old` are `Deleted`.
pub fn calc_property_changes(
    namespace: &str,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Vec<ConfigChange> {
    let mut changes = Vec::new();

    for (key, new_value) in new {
        match old.get(key) {
            None => changes.push(ConfigChange::new(
                namespace,
                key,
                None,
                Some(new_value.clone()),
                ChangeType::Added,
            )),
            Some(old_value) if old_value != new_value => changes.push(ConfigChange::new(
                namespace,
                key,
                Some(old_value.clone()),
                Some(new_value.clone()),
                ChangeType::Modified,
            )),
            Some(_) => {}
        }
    }

    for (key, old_value) in old {
        if !new.contains_key(key) {
            changes.push(ConfigChange::new(
                namespace,
                key,
                Some(old_value.clone()),
                None,
                ChangeType::Deleted,
            ));
        }
    }

    changes
}

/// Set of effective changes delivered to listeners in one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChangeEvent {
    namespace: String,
    changes: BTreeMap<String, ConfigChange>,
}

impl ConfigChangeEvent {
    pub fn new(
        namespace: impl Into<String>,
        changes: BTreeMap<String, ConfigChange>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            changes,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn changed_keys(&self) -> BTreeSet<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    pub fn change(
        &self,
        key: &str,
    ) -> Option<&ConfigChange> {
        self.changes.get(key)
    }

    pub fn is_changed(
        &self,
        key: &str,
    ) -> bool {
        self.changes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Copy of this event restricted to `keys`, or `None` if no key matches.
    pub fn filter_keys(
        &self,
        keys: &BTreeSet<String>,
    ) -> Option<Self> {
        let changes: BTreeMap<_, _> = self
            .changes
            .iter()
            .filter(|(k, _)| keys.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if changes.is_empty() {
            None
        } else {
            Some(Self::new(self.namespace.clone(), changes))
        }
    }
}
