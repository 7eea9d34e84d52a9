//! Metric name and label definitions.
//!
//! Every metric beacon records is named here so dashboards have one place to
//! look.

/// Ingestion metrics
pub mod ingest {
    /// Updates returned by the source (polling and webhook)
    pub const UPDATES_TOTAL: &str = "beacon_ingest_updates_total";
    /// Updates dropped because they could not be parsed
    pub const MALFORMED_TOTAL: &str = "beacon_ingest_malformed_total";
    /// Poll attempts that failed (network, timeout, API error)
    pub const POLL_ERRORS_TOTAL: &str = "beacon_ingest_poll_errors_total";
    /// Messages persisted for the first time
    pub const MESSAGES_NEW_TOTAL: &str = "beacon_ingest_messages_new_total";
    /// Messages that were already stored (upstream retries, edits)
    pub const MESSAGES_DUPLICATE_TOTAL: &str = "beacon_ingest_messages_duplicate_total";
}

/// Delivery metrics
pub mod push {
    /// Push attempts by outcome (`sent`, `expired`, `key_mismatch`, ...)
    pub const DELIVERIES_TOTAL: &str = "beacon_push_deliveries_total";
    /// Subscriptions deleted after a permanent failure
    pub const SUBSCRIPTIONS_REMOVED_TOTAL: &str = "beacon_push_subscriptions_removed_total";
    /// Duration of one message's fan-out in seconds
    pub const FANOUT_DURATION_SECONDS: &str = "beacon_push_fanout_duration_seconds";
}

/// Daemon cycle metrics
pub mod cycle {
    /// Cycles by result (`ok`, `aborted`)
    pub const CYCLES_TOTAL: &str = "beacon_cycles_total";
    /// Duration of a full ingest+dispatch cycle in seconds
    pub const DURATION_SECONDS: &str = "beacon_cycle_duration_seconds";
    /// Messages dispatched (marked notified)
    pub const MESSAGES_DISPATCHED_TOTAL: &str = "beacon_messages_dispatched_total";
    /// Messages awaiting dispatch after the last cycle
    pub const PENDING_MESSAGES: &str = "beacon_pending_messages";
}

/// Common label keys
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const OUTCOME: &str = "outcome";
    pub const RESULT: &str = "result";
    pub const SOURCE: &str = "source";
}

/// Histogram bucket boundaries
pub mod buckets {
    /// Fan-out duration buckets (in seconds), 10ms to 2 minutes
    pub const FANOUT_DURATION: &[f64] = &[
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
    ];

    /// Cycle duration buckets (in seconds), 50ms to 5 minutes
    pub const CYCLE_DURATION: &[f64] = &[
        0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
    ];
}
