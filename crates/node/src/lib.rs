//! # TxFlow Node
//!
//! Process-level wiring around the eventpool: tracing setup, write-ahead log
//! replay on start, and a local block loop that drives commits when no
//! consensus engine is attached.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod logging;
pub mod producer;

pub use bootstrap::{inspect_wal, replay_wal, start_eventpool, AppKind, ReplayStats, WalSummary};
pub use logging::{filter_directive, init_tracing, LogFormat};
pub use producer::{BlockProducer, BlockSummary};
