//! # covfuzz
//!
//! A coverage-guided, mutation-based fuzzer for arbitrary subprocess
//! targets. Each worker is a single OS process running an independent
//! `Driver` loop (scheduler → mutation engine → executor → coverage map →
//! crash detector), coordinating with its peers only through a
//! filesystem-mediated synchronizer. A `Supervisor` spawns and monitors the
//! worker processes and aggregates their stats.

pub mod config;
pub mod corpus;
pub mod coverage;
pub mod crash;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hashing;
pub mod logging;
pub mod minimizer;
pub mod mutation;
pub mod scheduler;
pub mod stats;
pub mod supervisor;
pub mod sync;
pub mod timestamp;
