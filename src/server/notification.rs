use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::model::Notification;
use crate::model::NotificationMessages;
use crate::model::ReleaseMessage;
use crate::model::WatchKey;
use crate::ReleaseMessageStore;
use crate::Result;
use crate::ServerError;
use crate::ACTIVE_HOLDS;
use crate::NOTIFICATION_HOLDS_RESOLVED;

/// How a held long-poll request ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    /// Namespaces whose id advanced past what the client reported
    Changed(Vec<Notification>),
    /// Timed out, or the server is shutting down
    NotModified,
}

/// Consumer of newly observed release messages.
pub trait ReleaseMessageListener: Send + Sync + 'static {
    fn handle_message(
        &self,
        message: &ReleaseMessage,
    );
}

#[derive(Debug, Clone)]
struct Watched {
    /// Name the client used, echoed back in notifications
    namespace: String,
    client_id: i64,
}

/// One parked long-poll request.
///
/// The sender is taken exactly once, by whichever of release, timeout or
/// shutdown gets there first.
#[derive(Debug)]
struct Hold {
    id: u64,
    watched: HashMap<String, Watched>,
    sender: Mutex<Option<oneshot::Sender<HoldOutcome>>>,
}

impl Hold {
    fn take_sender(&self) -> Option<oneshot::Sender<HoldOutcome>> {
        self.sender.lock().take()
    }

    fn resolve(
        &self,
        outcome: HoldOutcome,
        cause: &str,
    ) -> bool {
        match self.take_sender() {
            Some(sender) => {
                // the receiver may already be gone with a disconnected client
                let _ = sender.send(outcome);
                NOTIFICATION_HOLDS_RESOLVED.with_label_values(&[cause]).inc();
                true
            }
            None => false,
        }
    }
}

/// Registry of parked long-poll requests keyed by watch key.
///
/// A request is registered under every key it watches before the store is
/// consulted, so a release landing between the two is never missed.
pub struct NotificationHub {
    store: Arc<dyn ReleaseMessageStore>,
    hold_timeout: Duration,
    holds: DashMap<String, Vec<Arc<Hold>>>,
    next_hold_id: AtomicU64,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("hold_timeout", &self.hold_timeout)
            .field("watched_keys", &self.holds.len())
            .finish()
    }
}

/// Removes a hold from every bucket when the request ends, however it ends.
struct Registration<'a> {
    hub: &'a NotificationHub,
    hold: Arc<Hold>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        for key in self.hold.watched.keys() {
            let now_empty = match self.hub.holds.get_mut(key) {
                Some(mut bucket) => {
                    bucket.retain(|h| h.id != self.hold.id);
                    bucket.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.hub.holds.remove_if(key, |_, bucket| bucket.is_empty());
            }
        }
        ACTIVE_HOLDS.dec();
    }
}

impl NotificationHub {
    pub fn new(
        store: Arc<dyn ReleaseMessageStore>,
        hold_timeout: Duration,
    ) -> Self {
        Self {
            store,
            hold_timeout,
            holds: DashMap::new(),
            next_hold_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Parks a long-poll request until one of its namespaces advances, the
    /// hold timeout elapses or the hub shuts down.
    ///
    /// Duplicate namespaces keep the highest client id.
    pub async fn poll(
        &self,
        app_id: &str,
        cluster: &str,
        notifications: &[Notification],
    ) -> Result<HoldOutcome> {
        if notifications.is_empty() {
            return Err(ServerError::InvalidNotifications("no namespace to watch".to_string()).into());
        }

        let mut watched: HashMap<String, Watched> = HashMap::new();
        for n in notifications {
            let key = WatchKey::new(app_id, cluster, n.namespace_name.as_str()).to_string();
            let entry = watched.entry(key).or_insert_with(|| Watched {
                namespace: n.namespace_name.clone(),
                client_id: n.notification_id,
            });
            entry.client_id = entry.client_id.max(n.notification_id);
        }

        let (sender, mut receiver) = oneshot::channel();
        let hold = Arc::new(Hold {
            id: self.next_hold_id.fetch_add(1, Ordering::Relaxed),
            watched,
            sender: Mutex::new(Some(sender)),
        });
        let _registration = self.register(hold.clone());

        if self.shut_down.load(Ordering::Acquire) {
            hold.resolve(HoldOutcome::NotModified, "shutdown");
        } else {
            let changed = self.changed_since(&hold)?;
            if !changed.is_empty() {
                hold.resolve(HoldOutcome::Changed(changed), "immediate");
            }
        }

        let waited = timeout(self.hold_timeout, &mut receiver).await;
        let outcome = match waited {
            Ok(result) => result.unwrap_or(HoldOutcome::NotModified),
            Err(_) => {
                if hold.take_sender().is_some() {
                    NOTIFICATION_HOLDS_RESOLVED.with_label_values(&["timeout"]).inc();
                    HoldOutcome::NotModified
                } else {
                    // resolved concurrently with the deadline
                    receiver.await.unwrap_or(HoldOutcome::NotModified)
                }
            }
        };
        trace!("hold {} finished: {:?}", hold.id, outcome);
        Ok(outcome)
    }

    /// Resolves every outstanding hold with "not modified" and makes later
    /// polls return immediately.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let holds: Vec<Arc<Hold>> = self
            .holds
            .iter()
            .flat_map(|bucket| bucket.value().clone())
            .collect();

        let resolved = holds
            .iter()
            .filter(|h| h.resolve(HoldOutcome::NotModified, "shutdown"))
            .count();
        info!("notification hub shut down, released {} held requests", resolved);
    }

    /// Number of requests currently parked on `key`.
    pub fn watchers(
        &self,
        key: &str,
    ) -> usize {
        self.holds.get(key).map(|b| b.len()).unwrap_or(0)
    }

    fn register(
        &self,
        hold: Arc<Hold>,
    ) -> Registration<'_> {
        for key in hold.watched.keys() {
            self.holds.entry(key.clone()).or_default().push(hold.clone());
        }
        ACTIVE_HOLDS.inc();
        Registration { hub: self, hold }
    }

    fn changed_since(
        &self,
        hold: &Hold,
    ) -> Result<Vec<Notification>> {
        let mut changed = Vec::new();
        for (key, watched) in &hold.watched {
            if let Some(latest) = self.store.latest_for(key)? {
                if latest.id as i64 > watched.client_id {
                    changed.push(notification_for(key, watched, latest.id));
                }
            }
        }
        changed.sort_by(|a, b| a.namespace_name.cmp(&b.namespace_name));
        Ok(changed)
    }
}

impl ReleaseMessageListener for NotificationHub {
    fn handle_message(
        &self,
        message: &ReleaseMessage,
    ) {
        let targets: Vec<Arc<Hold>> = match self.holds.get(&message.topic) {
            Some(bucket) => bucket.value().clone(),
            None => return,
        };
        debug!(
            topic = %message.topic,
            message_id = message.id,
            "notifying {} held requests",
            targets.len()
        );

        for hold in targets {
            let Some(watched) = hold.watched.get(&message.topic) else {
                continue;
            };
            if message.id as i64 <= watched.client_id {
                continue;
            }
            let notification = notification_for(&message.topic, watched, message.id);
            hold.resolve(HoldOutcome::Changed(vec![notification]), "release");
        }
    }
}

fn notification_for(
    key: &str,
    watched: &Watched,
    id: u64,
) -> Notification {
    let mut messages = NotificationMessages::default();
    messages.put(key, id as i64);
    Notification {
        namespace_name: watched.namespace.clone(),
        notification_id: id as i64,
        messages: Some(messages),
    }
}
