//! Data model shared by the client and server halves of the protocol.
//!
//! Wire types (`ConfigResponse`, `Notification`, `ServiceAddress`) use the
//! camelCase JSON field names clients in the fleet already speak. Persisted
//! types (`ReleaseMessage`, `Release`) are bincode-encoded into sled.

mod change;
mod notification;
mod release;
mod service;
mod snapshot;

pub use change::*;
pub use notification::*;
pub use release::*;
pub use service::*;
pub use snapshot::*;
