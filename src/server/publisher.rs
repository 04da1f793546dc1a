use std::collections::BTreeMap;
use std::sync::Arc;

use autometrics::autometrics;
use nanoid::nanoid;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::model::Release;
use crate::model::ReleaseMessage;
use crate::time::get_now_as_u64_ms;
use crate::ReleaseMessageStore;
use crate::ReleaseStore;
use crate::Result;
use crate::ServerError;
use crate::API_SLO;
use crate::CLEANUP_FAILURES;
use crate::CLEANUP_QUEUE_DROPPED;
use crate::RELEASE_MESSAGES_CLEANED;
use crate::RELEASE_PUBLISHED;

/// Persists releases and their release messages.
///
/// Every saved message id is offered to a bounded cleanup queue. A full
/// queue drops the id: cleanup is best-effort and never slows publishing.
pub struct ReleasePublisher {
    message_store: Arc<dyn ReleaseMessageStore>,
    release_store: Arc<dyn ReleaseStore>,
    cleanup_tx: mpsc::Sender<u64>,
    // one publish at a time so a rollback never clobbers a newer release
    publish_lock: Mutex<()>,
}

impl std::fmt::Debug for ReleasePublisher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ReleasePublisher")
            .field("cleanup_capacity", &self.cleanup_tx.max_capacity())
            .finish()
    }
}

impl ReleasePublisher {
    /// Returns the publisher and the worker that drains its cleanup queue;
    /// the caller decides where the worker runs.
    pub fn new(
        message_store: Arc<dyn ReleaseMessageStore>,
        release_store: Arc<dyn ReleaseStore>,
        queue_capacity: usize,
        batch_size: usize,
    ) -> (Self, CleanupWorker) {
        let (cleanup_tx, queue) = mpsc::channel(queue_capacity.max(1));
        let worker = CleanupWorker {
            store: message_store.clone(),
            queue,
            batch_size: batch_size.max(1),
        };
        (
            Self {
                message_store,
                release_store,
                cleanup_tx,
                publish_lock: Mutex::new(()),
            },
            worker,
        )
    }

    /// Stores `configurations` as the latest release of `topic` under a
    /// fresh release key, then announces it with a release message.
    ///
    /// Either write failing fails the publish. When the message cannot be
    /// appended the previous release is put back, so `/configs` never serves
    /// values whose publish was reported as failed.
    #[autometrics(objective = API_SLO)]
    pub fn publish(
        &self,
        topic: &str,
        configurations: BTreeMap<String, String>,
    ) -> Result<ReleaseMessage> {
        if topic.trim().is_empty() {
            return Err(ServerError::EmptyTopic.into());
        }

        let _guard = self.publish_lock.lock();
        let previous = self.release_store.find_release(topic)?;
        let release = Release {
            topic: topic.to_string(),
            release_key: generate_release_key(),
            configurations,
            created_at_ms: get_now_as_u64_ms(),
        };
        if let Err(e) = self.release_store.save_release(&release) {
            error!("saving release {} for {} failed: {}", release.release_key, topic, e);
            return Err(e);
        }
        debug!("release {} saved for {}", release.release_key, topic);

        match self.send_message(topic) {
            Ok(message) => Ok(message),
            Err(e) => {
                self.rollback_release(topic, previous.as_ref(), &release.release_key);
                Err(e)
            }
        }
    }

    fn rollback_release(
        &self,
        topic: &str,
        previous: Option<&Release>,
        failed_key: &str,
    ) {
        let restored = match previous {
            Some(previous) => self.release_store.save_release(previous),
            None => self.release_store.delete_release(topic),
        };
        match restored {
            Ok(()) => warn!("release {} for {} rolled back", failed_key, topic),
            Err(e) => error!("rolling back release {} for {} failed: {}", failed_key, topic, e),
        }
    }

    /// Appends a release message for `topic` and queues the older ones of
    /// the same topic for cleanup.
    pub fn send_message(
        &self,
        topic: &str,
    ) -> Result<ReleaseMessage> {
        info!("sending message {}", topic);
        let message = match self.message_store.save(topic) {
            Ok(message) => message,
            Err(e) => {
                error!("sending message to store failed: {}", e);
                return Err(e);
            }
        };
        RELEASE_PUBLISHED.with_label_values(&[topic]).inc();

        match self.cleanup_tx.try_send(message.id) {
            Ok(()) => {}
            Err(TrySendError::Full(id)) => {
                debug!("cleanup queue full, skipping cleanup for message {}", id);
                CLEANUP_QUEUE_DROPPED.inc();
            }
            Err(TrySendError::Closed(id)) => {
                warn!("cleanup worker is gone, skipping cleanup for message {}", id);
            }
        }
        Ok(message)
    }
}

fn generate_release_key() -> String {
    format!("{}-{}", get_now_as_u64_ms(), nanoid!(12))
}

/// Single consumer of the cleanup queue.
///
/// For each queued id, deletes every older message of the same topic in
/// ascending batches until a batch comes back short.
pub struct CleanupWorker {
    store: Arc<dyn ReleaseMessageStore>,
    queue: mpsc::Receiver<u64>,
    batch_size: usize,
}

impl std::fmt::Debug for CleanupWorker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CleanupWorker")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl CleanupWorker {
    /// Runs until `shutdown` fires or every publisher is dropped. Failures
    /// are logged and the loop goes on.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!("release message cleanup worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("release message cleanup worker stopped");
                    return Ok(());
                }
                next = self.queue.recv() => match next {
                    Some(id) => self.handle(id),
                    None => {
                        debug!("cleanup queue closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles whatever is queued right now without waiting.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(id) = self.queue.try_recv() {
            self.handle(id);
            handled += 1;
        }
        handled
    }

    fn handle(
        &self,
        id: u64,
    ) {
        if let Err(e) = self.clean_message(id) {
            error!("cleaning release messages before {} failed: {}", id, e);
            CLEANUP_FAILURES.inc();
        }
    }

    /// Returns how many messages were deleted.
    pub fn clean_message(
        &self,
        id: u64,
    ) -> Result<usize> {
        // the message may be gone already, e.g. rolled back
        let Some(message) = self.store.find_by_id(id)? else {
            debug!("release message {} no longer exists", id);
            return Ok(0);
        };

        let mut deleted = 0;
        loop {
            let batch = self
                .store
                .find_earlier(&message.topic, message.id, self.batch_size)?;
            self.store.delete_all(&batch)?;

            for removed in &batch {
                debug!(
                    message_id = removed.id,
                    topic = %removed.topic,
                    "release message cleaned"
                );
            }
            RELEASE_MESSAGES_CLEANED
                .with_label_values(&[&message.topic])
                .inc_by(batch.len() as u64);
            deleted += batch.len();

            if batch.len() < self.batch_size {
                break;
            }
        }
        Ok(deleted)
    }
}
