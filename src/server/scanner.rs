use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::ReleaseMessageListener;
use crate::constants::SCAN_BATCH_SIZE;
use crate::ReleaseMessageStore;
use crate::Result;

/// Polls the message store for ids past the last one seen and hands each new
/// message, in id order, to every registered listener.
pub struct ReleaseMessageScanner {
    store: Arc<dyn ReleaseMessageStore>,
    scan_interval: Duration,
    max_id_scanned: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn ReleaseMessageListener>>>,
}

impl std::fmt::Debug for ReleaseMessageScanner {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ReleaseMessageScanner")
            .field("scan_interval", &self.scan_interval)
            .field("max_id_scanned", &self.max_id_scanned.load(Ordering::Relaxed))
            .finish()
    }
}

impl ReleaseMessageScanner {
    /// Starts after the newest message already stored; history is not replayed.
    pub fn new(
        store: Arc<dyn ReleaseMessageStore>,
        scan_interval: Duration,
    ) -> Result<Self> {
        let max_id = store.max_id()?;
        Ok(Self {
            store,
            scan_interval,
            max_id_scanned: AtomicU64::new(max_id),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn ReleaseMessageListener>,
    ) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn max_id_scanned(&self) -> u64 {
        self.max_id_scanned.load(Ordering::Acquire)
    }

    /// Drains everything newer than the last scanned id. Returns the number
    /// of messages delivered.
    pub fn scan(&self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let after = self.max_id_scanned();
            let batch = self.store.find_after(after, SCAN_BATCH_SIZE)?;
            let Some(last) = batch.last() else {
                break;
            };
            let last_id = last.id;

            let listeners = self.listeners.read().clone();
            for message in &batch {
                for listener in &listeners {
                    listener.handle_message(message);
                }
            }
            self.max_id_scanned.store(last_id, Ordering::Release);
            delivered += batch.len();

            if batch.len() < SCAN_BATCH_SIZE {
                break;
            }
        }
        if delivered > 0 {
            debug!("scanned {} new release messages", delivered);
        }
        Ok(delivered)
    }

    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!("release message scanner started at id {}", self.max_id_scanned());
        let mut ticker = interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("release message scanner stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan() {
                        error!("scanning release messages failed: {}", e);
                    }
                }
            }
        }
    }
}
