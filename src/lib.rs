//! Fleet-wide configuration distribution.
//!
//! The server half ([`ConfigServer`]) stores versioned releases per
//! `{appId}+{cluster}+{namespace}` and parks long-poll requests until a
//! release lands. The client half ([`ClientRuntime`]) keeps a last-good
//! snapshot per namespace, refreshes it on notification or on a timer, and
//! reports per-key changes through [`DefaultConfig`].

mod client;
mod config;
pub mod constants;
mod errors;
mod metrics;
pub mod model;
mod server;
mod storage;
pub mod utils;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use server::*;
pub use storage::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms250, ObjectivePercentile::P99);
