//! Fixed-interval cycle loop with cooperative shutdown.

use std::time::{Duration, Instant};

use {
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
};

#[cfg(feature = "metrics")]
use beacon_metrics::{counter, cycle as cycle_metrics, histogram, labels};

use crate::{
    Result,
    cycle::{CycleReport, CycleRunner},
    state::{DaemonState, publish},
};

/// Drives a [`CycleRunner`] until cancelled.
pub struct Scheduler {
    runner: CycleRunner,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: CycleRunner, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            runner,
            interval,
            shutdown,
        }
    }

    pub fn runner(&self) -> &CycleRunner {
        &self.runner
    }

    /// Startup reconciliation, then cycles every `interval` until the
    /// shutdown token fires. Only the wait between cycles is interrupted; a
    /// running cycle always completes, with `Stopping` published as soon as
    /// the token fires.
    pub async fn run(mut self) -> Result<()> {
        info!(interval_secs = self.interval.as_secs(), "daemon started");
        self.startup_reconcile().await;

        let mut cycles: u64 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            cycles += 1;
            self.timed_cycle(cycles).await;

            if self.shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {},
                () = self.shutdown.cancelled() => {},
            }
        }

        self.runner.set_state(DaemonState::Stopping);
        info!(cycles, "daemon stopping");
        self.runner.set_state(DaemonState::Stopped);
        Ok(())
    }

    /// Startup reconciliation plus exactly one cycle.
    pub async fn run_once(mut self) -> Result<CycleReport> {
        self.startup_reconcile().await;
        let report = self.runner.run_cycle().await;
        self.runner.set_state(DaemonState::Stopped);
        report
    }

    async fn startup_reconcile(&mut self) {
        if let Err(e) = self.runner.reconcile().await {
            error!(error = %e, "startup reconciliation failed, continuing with cycles");
        }
    }

    async fn timed_cycle(&mut self, cycle: u64) {
        let started = Instant::now();
        let state = self.runner.state_sender();
        let result = {
            let running = self.runner.run_cycle();
            tokio::pin!(running);
            tokio::select! {
                biased;
                result = &mut running => result,
                () = self.shutdown.cancelled() => {
                    publish(&state, DaemonState::Stopping);
                    info!(cycle, "shutdown requested, finishing current cycle");
                    running.await
                },
            }
        };
        let elapsed = started.elapsed();

        #[cfg(feature = "metrics")]
        histogram!(cycle_metrics::DURATION_SECONDS).record(elapsed.as_secs_f64());

        match result {
            Ok(report) => {
                #[cfg(feature = "metrics")]
                counter!(cycle_metrics::CYCLES_TOTAL, labels::RESULT => "ok").increment(1);
                if report.polled > 0 || report.dispatched > 0 {
                    info!(
                        cycle,
                        polled = report.polled,
                        new = report.new_messages,
                        duplicates = report.duplicates,
                        dispatched = report.dispatched,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "cycle complete"
                    );
                }
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(cycle_metrics::CYCLES_TOTAL, labels::RESULT => "aborted").increment(1);
                error!(
                    cycle,
                    error = %e,
                    carried = self.runner.carried(),
                    "cycle aborted, retrying next interval"
                );
            },
        }
    }
}
