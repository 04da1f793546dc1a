// -
// Protocol

/// Separator used when joining appId, cluster and namespace into a watch key.
pub const CLUSTER_NAMESPACE_SEPARATOR: &str = "+";

/// Cluster used when the client does not configure one.
pub const DEFAULT_CLUSTER: &str = "default";

/// Notification id a client reports before it has seen any release.
pub const INIT_NOTIFICATION_ID: i64 = -1;

/// Signature headers
pub const HTTP_HEADER_AUTHORIZATION: &str = "Authorization";
pub const HTTP_HEADER_TIMESTAMP: &str = "Timestamp";
pub(crate) const AUTHORIZATION_FORMAT_PREFIX: &str = "Apollo";

// -
// Client defaults

/// Wait at most this long for a fetch rate-limit token before proceeding anyway.
pub(crate) const RATE_LIMIT_ACQUIRE_TIMEOUT_MS: u64 = 5000;

/// One warn line per minute when serving defaults because nothing loaded.
pub(crate) const WARN_LOG_PER_SECOND: f64 = 1.0 / 60.0;

/// File extension of bundled resources and local cache files.
pub(crate) const PROPERTIES_EXTENSION: &str = "properties";

// -
// Server defaults

/// Capacity of the release-message cleanup queue.
pub const CLEAN_QUEUE_MAX_SIZE: usize = 100;

/// Number of superseded release messages deleted per batch.
pub const CLEAN_BATCH_SIZE: usize = 100;

/// Upper bound of messages handed to listeners per scan.
pub(crate) const SCAN_BATCH_SIZE: usize = 500;

/// Sled trees
pub(crate) const RELEASE_MESSAGE_TREE: &str = "_release_message";
pub(crate) const RELEASE_MESSAGE_TOPIC_INDEX_TREE: &str = "_release_message_topic_index";
pub(crate) const RELEASE_TREE: &str = "_release";
