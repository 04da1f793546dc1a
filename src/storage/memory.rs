use std::collections::BTreeMap;
use std::collections::HashMap;

use parking_lot::RwLock;

use super::ReleaseMessageStore;
use super::ReleaseStore;
use crate::model::Release;
use crate::model::ReleaseMessage;
use crate::time::get_now_as_u64_ms;
use crate::Result;

#[derive(Debug, Default)]
struct MessageLog {
    next_id: u64,
    rows: BTreeMap<u64, ReleaseMessage>,
}

/// Process-local store for tests and single-node deployments without `db_path`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<MessageLog>,
    releases: RwLock<HashMap<String, Release>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().rows.len()
    }
}

impl ReleaseMessageStore for MemoryStore {
    fn save(
        &self,
        topic: &str,
    ) -> Result<ReleaseMessage> {
        let mut log = self.messages.write();
        log.next_id += 1;
        let message = ReleaseMessage {
            id: log.next_id,
            topic: topic.to_string(),
            created_at_ms: get_now_as_u64_ms(),
        };
        log.rows.insert(message.id, message.clone());
        Ok(message)
    }

    fn find_by_id(
        &self,
        id: u64,
    ) -> Result<Option<ReleaseMessage>> {
        Ok(self.messages.read().rows.get(&id).cloned())
    }

    fn find_earlier(
        &self,
        topic: &str,
        before_id: u64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>> {
        Ok(self
            .messages
            .read()
            .rows
            .range(..before_id)
            .map(|(_, m)| m)
            .filter(|m| m.topic == topic)
            .take(limit)
            .cloned()
            .collect())
    }

    fn find_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>> {
        Ok(self
            .messages
            .read()
            .rows
            .range(after_id.saturating_add(1)..)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn latest_for(
        &self,
        topic: &str,
    ) -> Result<Option<ReleaseMessage>> {
        Ok(self
            .messages
            .read()
            .rows
            .values()
            .rev()
            .find(|m| m.topic == topic)
            .cloned())
    }

    fn max_id(&self) -> Result<u64> {
        Ok(self
            .messages
            .read()
            .rows
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    fn delete_all(
        &self,
        messages: &[ReleaseMessage],
    ) -> Result<()> {
        let mut log = self.messages.write();
        for m in messages {
            log.rows.remove(&m.id);
        }
        Ok(())
    }
}

impl ReleaseStore for MemoryStore {
    fn save_release(
        &self,
        release: &Release,
    ) -> Result<()> {
        self.releases
            .write()
            .insert(release.topic.clone(), release.clone());
        Ok(())
    }

    fn delete_release(
        &self,
        topic: &str,
    ) -> Result<()> {
        self.releases.write().remove(topic);
        Ok(())
    }

    fn find_release(
        &self,
        topic: &str,
    ) -> Result<Option<Release>> {
        Ok(self.releases.read().get(topic).cloned())
    }
}
