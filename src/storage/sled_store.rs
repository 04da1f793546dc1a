use std::convert::Infallible;
use std::path::Path;

use parking_lot::Mutex;
use sled::transaction::TransactionResult;
use sled::Transactional;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::ReleaseMessageStore;
use super::ReleaseStore;
use crate::constants::RELEASE_MESSAGE_TOPIC_INDEX_TREE;
use crate::constants::RELEASE_MESSAGE_TREE;
use crate::constants::RELEASE_TREE;
use crate::model::Release;
use crate::model::ReleaseMessage;
use crate::time::get_now_as_u64_ms;
use crate::Result;
use crate::StorageError;

/// Sled-backed store.
///
/// Messages are keyed by big-endian id so tree order is id order. A second
/// tree indexes `{topic}\0{id}` so per-topic scans never touch other topics.
///
/// Saves allocate the id and commit under one lock, so a reader that sees id
/// `n` also sees every id below it. The scanner relies on that.
pub struct SledStore {
    db: sled::Db,

    save_lock: Mutex<()>,

    pub(crate) message_tree: sled::Tree,

    pub(crate) topic_index_tree: sled::Tree,

    pub(crate) release_tree: sled::Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("messages", &self.message_tree.len())
            .field("releases", &self.release_tree.len())
            .finish()
    }
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        let message_tree = db.open_tree(RELEASE_MESSAGE_TREE)?;
        let topic_index_tree = db.open_tree(RELEASE_MESSAGE_TOPIC_INDEX_TREE)?;
        let release_tree = db.open_tree(RELEASE_TREE)?;
        Ok(Self {
            db,
            save_lock: Mutex::new(()),
            message_tree,
            topic_index_tree,
            release_tree,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn id_to_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn topic_prefix(topic: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(topic.len() + 1);
        prefix.extend_from_slice(topic.as_bytes());
        prefix.push(0);
        prefix
    }

    fn index_key(
        topic: &str,
        id: u64,
    ) -> Vec<u8> {
        let mut key = Self::topic_prefix(topic);
        key.extend_from_slice(&Self::id_to_key(id));
        key
    }

    fn decode_message(
        bytes: &[u8],
        location: &str,
    ) -> Result<ReleaseMessage> {
        bincode::deserialize(bytes).map_err(|e| {
            warn!("undecodable release message at {}: {}", location, e);
            StorageError::DataCorruption {
                location: location.to_string(),
            }
            .into()
        })
    }

    fn load_by_key(
        &self,
        key: &[u8],
    ) -> Result<Option<ReleaseMessage>> {
        match self.message_tree.get(key)? {
            Some(bytes) => Ok(Some(Self::decode_message(&bytes, RELEASE_MESSAGE_TREE)?)),
            None => Ok(None),
        }
    }
}

impl ReleaseMessageStore for SledStore {
    #[instrument(skip(self))]
    fn save(
        &self,
        topic: &str,
    ) -> Result<ReleaseMessage> {
        let _guard = self.save_lock.lock();
        // generate_id starts at 0; ids handed to clients start at 1
        let id = self.db.generate_id()? + 1;
        let message = ReleaseMessage {
            id,
            topic: topic.to_string(),
            created_at_ms: get_now_as_u64_ms(),
        };
        let key = Self::id_to_key(id);
        let index_key = Self::index_key(topic, id);
        let value = bincode::serialize(&message)?;

        let result: TransactionResult<(), Infallible> =
            (&self.message_tree, &self.topic_index_tree).transaction(|(messages, index)| {
                messages.insert(&key[..], value.as_slice())?;
                index.insert(index_key.as_slice(), &key[..])?;
                Ok(())
            });
        result.map_err(|e| StorageError::DbError(e.to_string()))?;

        debug!("saved release message {} for {}", id, topic);
        Ok(message)
    }

    fn find_by_id(
        &self,
        id: u64,
    ) -> Result<Option<ReleaseMessage>> {
        self.load_by_key(&Self::id_to_key(id))
    }

    #[instrument(skip(self))]
    fn find_earlier(
        &self,
        topic: &str,
        before_id: u64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>> {
        let start = Self::index_key(topic, 0);
        let end = Self::index_key(topic, before_id);
        let mut found = Vec::new();

        for item in self.topic_index_tree.range(start..end) {
            if found.len() >= limit {
                break;
            }
            let (_, message_key) = item?;
            if let Some(message) = self.load_by_key(&message_key)? {
                found.push(message);
            }
        }
        Ok(found)
    }

    fn find_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>> {
        let start = Self::id_to_key(after_id.saturating_add(1));
        let mut found = Vec::new();

        for item in self.message_tree.range(start..).take(limit) {
            let (_, bytes) = item?;
            found.push(Self::decode_message(&bytes, RELEASE_MESSAGE_TREE)?);
        }
        Ok(found)
    }

    fn latest_for(
        &self,
        topic: &str,
    ) -> Result<Option<ReleaseMessage>> {
        match self.topic_index_tree.scan_prefix(Self::topic_prefix(topic)).next_back() {
            Some(item) => {
                let (_, message_key) = item?;
                self.load_by_key(&message_key)
            }
            None => Ok(None),
        }
    }

    fn max_id(&self) -> Result<u64> {
        match self.message_tree.last()? {
            Some((_, bytes)) => Ok(Self::decode_message(&bytes, RELEASE_MESSAGE_TREE)?.id),
            None => Ok(0),
        }
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    fn delete_all(
        &self,
        messages: &[ReleaseMessage],
    ) -> Result<()> {
        let result: TransactionResult<(), Infallible> =
            (&self.message_tree, &self.topic_index_tree).transaction(|(tree, index)| {
                for m in messages {
                    tree.remove(&Self::id_to_key(m.id)[..])?;
                    index.remove(Self::index_key(&m.topic, m.id))?;
                }
                Ok(())
            });
        result.map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }
}

impl ReleaseStore for SledStore {
    fn save_release(
        &self,
        release: &Release,
    ) -> Result<()> {
        let value = bincode::serialize(release)?;
        self.release_tree.insert(release.topic.as_bytes(), value)?;
        Ok(())
    }

    fn delete_release(
        &self,
        topic: &str,
    ) -> Result<()> {
        self.release_tree.remove(topic.as_bytes())?;
        Ok(())
    }

    fn find_release(
        &self,
        topic: &str,
    ) -> Result<Option<Release>> {
        match self.release_tree.get(topic.as_bytes())? {
            Some(bytes) => {
                let release = bincode::deserialize::<Release>(&bytes).map_err(|e| {
                    warn!("undecodable release for {}: {}", topic, e);
                    StorageError::DataCorruption {
                        location: format!("{}/{}", RELEASE_TREE, topic),
                    }
                })?;
                Ok(Some(release))
            }
            None => Ok(None),
        }
    }
}
