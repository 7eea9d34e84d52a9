//! Metrics collection and export for beacon.
//!
//! Crates record through the `metrics` facade macros re-exported here. The
//! binary installs a Prometheus recorder when the `prometheus` feature is
//! compiled in and metrics are enabled; otherwise recording is a no-op.
//!
//! ```rust,ignore
//! use beacon_metrics::{counter, push};
//!
//! counter!(push::DELIVERIES_TOTAL, "outcome" => "sent").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
