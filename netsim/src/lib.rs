//! Simulate a small packet-switched network of cooperating tasks.
//!
//! Two senders generate fixed-size packets on a fixed period, a switch relays
//! them to one of two receivers (dropping a configurable fraction and delaying
//! every forwarded packet), and the receivers infer loss from gaps in each
//! sender's sequence numbers. Once every receiver has counted its configured
//! number of packets, a terminator aborts all tasks.
//!
//! ```txt
//! sender_1 --+                  +--> receiver_3 --+
//!            |--> switch -------|                 |--> completion --> terminator
//! sender_2 --+                  +--> receiver_4 --+
//! ```
//!
//! Tasks run on any runtime implementing [commonware_runtime::Spawner],
//! [commonware_runtime::Clock] and [commonware_runtime::Metrics]. Random
//! decisions come from per-task generators derived from one seed, drawn from
//! the runtime (a [rand::Rng]) unless [Config::seed] is set. The binary uses the `tokio` runtime (or the `deterministic`
//! runtime when seeded) and tests use the `deterministic` runtime.
//!
//! # Packet ownership
//!
//! [Packet] is not `Clone`. It is moved into a [channel::Producer], out of the
//! matching [channel::Consumer], and dropped by whichever task ends its journey
//! (the switch when it drops or rejects a packet, the receiver otherwise).
//!
//! # Example
//!
//! ```rust
//! use commonware_runtime::{deterministic, Metrics, Runner};
//! use netsim::{Config, Simulation};
//!
//! let executor = deterministic::Runner::seeded(0);
//! let summary = executor.start(|context| async move {
//!     let cfg = Config {
//!         drop_probability: 0.0,
//!         stop_threshold: 5,
//!         ..Config::default()
//!     };
//!     let (handle, _) = Simulation::new(context.with_label("simulation"), cfg)
//!         .unwrap()
//!         .start();
//!     handle.await.unwrap()
//! });
//! for report in summary.reports {
//!     assert_eq!(report.received, 5);
//!     assert_eq!(report.lost, 0);
//! }
//! ```

pub mod channel;
pub mod completion;
mod config;
pub mod metrics;
pub mod packet;
pub mod receiver;
pub mod sender;
mod simulation;
pub mod switch;
pub mod terminator;

pub use completion::{Completion, Phase};
pub use config::Config;
pub use packet::Packet;
pub use receiver::Report;
pub use simulation::Simulation;
pub use terminator::Summary;

use std::collections::TryReserveError;
use thiserror::Error;

/// Addresses of the sender nodes.
pub const SENDERS: [u8; 2] = [1, 2];

/// Addresses of the receiver nodes.
pub const RECEIVERS: [u8; 2] = [3, 4];

/// Errors that can occur when configuring or running a simulation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid packet size (must be in [{min}, {max}]): {0}", min = packet::HEADER_SIZE, max = u16::MAX)]
    InvalidPacketSize(usize),
    #[error("invalid drop probability (must be in [0, 1]): {0}")]
    InvalidDropProbability(f64),
    #[error("invalid channel capacity (must be non-zero): {0}")]
    InvalidCapacity(usize),
    #[error("invalid stop threshold (must be non-zero): {0}")]
    InvalidThreshold(u32),
    #[error("invalid sender period (must be non-zero)")]
    InvalidPeriod,
    #[error("packet allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Returns the position of a receiver address in [RECEIVERS], if any.
pub fn receiver_index(address: u8) -> Option<usize> {
    RECEIVERS.iter().position(|receiver| *receiver == address)
}
