//! Client half of the propagation protocol.
//!
//! A [`ClientRuntime`] hands out one [`DefaultConfig`] facade per namespace.
//! Each facade sits on a [`RemoteConfigRepository`] (optionally wrapped by a
//! [`LocalFileConfigRepository`]) that is refreshed periodically and whenever
//! the process-wide [`LongPollClient`] learns about a new release.

mod facade;
mod http;
mod local_file;
mod long_poll;
mod repository;
mod runtime;
mod service_locator;
mod signature;
mod sources;

pub use facade::*;
pub use http::*;
pub use local_file::*;
pub use long_poll::*;
pub use repository::*;
pub use runtime::*;
pub use service_locator::*;
pub use signature::*;
pub use sources::*;

#[cfg(test)]
mod local_file_test;
#[cfg(test)]
mod service_locator_test;
