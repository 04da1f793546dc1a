//! Config-service side: publishing releases and answering long polls.
//!
//! A publish writes a release and a release message. The scanner notices the
//! new message and hands it to the [`NotificationHub`], which wakes every
//! long-poll request parked on that watch key. Superseded messages are
//! removed in the background by the [`CleanupWorker`].

mod http;
mod node;
mod notification;
mod publisher;
mod scanner;

pub use http::*;
pub use node::*;
pub use notification::*;
pub use publisher::*;
pub use scanner::*;

#[cfg(test)]
mod http_test;
#[cfg(test)]
mod publisher_test;
#[cfg(test)]
mod scanner_test;
