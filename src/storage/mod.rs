//! Persistence behind the publish path.
//!
//! Two seams: [`ReleaseMessageStore`] holds the append-only release markers
//! the notification protocol is driven by, and [`ReleaseStore`] holds the
//! latest released values per watch key that `/configs` serves. Both come in a
//! sled-backed and an in-memory flavour.

mod memory;
mod sled_store;

pub use memory::*;
pub use sled_store::*;


#[cfg(test)]
use mockall::automock;

use crate::model::Release;
use crate::model::ReleaseMessage;
use crate::Result;

/// Append-only log of release markers.
///
/// # Invariants
/// - ids are assigned by the store, strictly increasing, never reused
/// - rows become visible in id order: once `n` is readable, so is every
///   surviving id below `n`
/// - rows are only ever inserted or deleted, never updated
#[cfg_attr(test, automock)]
pub trait ReleaseMessageStore: Send + Sync + 'static {
    /// Persists a new marker for `topic` and returns it with its id.
    fn save(
        &self,
        topic: &str,
    ) -> Result<ReleaseMessage>;

    fn find_by_id(
        &self,
        id: u64,
    ) -> Result<Option<ReleaseMessage>>;

    /// Up to `limit` markers of `topic` with id below `before_id`, oldest first.
    fn find_earlier(
        &self,
        topic: &str,
        before_id: u64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>>;

    /// Up to `limit` markers of any topic with id above `after_id`, oldest first.
    fn find_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>>;

    /// Newest marker of `topic`.
    fn latest_for(
        &self,
        topic: &str,
    ) -> Result<Option<ReleaseMessage>>;

    /// Highest id ever stored and still present, 0 when empty.
    fn max_id(&self) -> Result<u64>;

    fn delete_all(
        &self,
        messages: &[ReleaseMessage],
    ) -> Result<()>;
}

/// Latest release per watch key.
#[cfg_attr(test, automock)]
pub trait ReleaseStore: Send + Sync + 'static {
    fn save_release(
        &self,
        release: &Release,
    ) -> Result<()>;

    /// Removes the release of `topic`; a missing release is not an error.
    fn delete_release(
        &self,
        topic: &str,
    ) -> Result<()>;

    fn find_release(
        &self,
        topic: &str,
    ) -> Result<Option<Release>>;
}
