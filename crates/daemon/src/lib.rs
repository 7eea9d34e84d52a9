//! The beacon daemon: a fixed-interval ingest → persist → dispatch cycle,
//! an optional webhook server feeding the same store and dispatcher, and
//! the read-only status report.

pub mod cycle;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod signal;
pub mod state;
pub mod status;

pub use {
    cycle::{CycleReport, CycleRunner},
    error::{Error, Result},
    runtime::{RunOptions, run},
    scheduler::Scheduler,
    server::{ServerState, build_router},
    signal::SignalFlag,
    state::DaemonState,
    status::StatusReport,
};
