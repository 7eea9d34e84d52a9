//! One ingest → persist → dispatch cycle.

use std::sync::Arc;

use {
    beacon_dispatch::{DispatchOutcome, Dispatcher},
    beacon_store::{MessageStore, NewMessage},
    beacon_telegram::UpdateSource,
    tokio::sync::watch,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use beacon_metrics::{counter, gauge, ingest as ingest_metrics};

use crate::{
    Result,
    state::{DaemonState, publish},
};

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Candidates returned by the source this cycle.
    pub polled: usize,
    /// Candidates persisted for the first time.
    pub new_messages: usize,
    /// Candidates that were already stored.
    pub duplicates: usize,
    /// Messages handed to the dispatcher and marked notified.
    pub dispatched: usize,
    /// Of `dispatched`, those nobody was subscribed to.
    pub without_subscribers: usize,
    /// Messages the webhook path was dispatching or had already dispatched.
    pub skipped: usize,
}

/// Executes cycles. Owns the ingestion source and the carry buffer of
/// candidates that were polled but not yet persisted.
pub struct CycleRunner {
    source: Option<Box<dyn UpdateSource>>,
    messages: Arc<dyn MessageStore>,
    dispatcher: Arc<Dispatcher>,
    reconcile_batch: usize,
    carry: Vec<NewMessage>,
    state: Arc<watch::Sender<DaemonState>>,
}

impl CycleRunner {
    /// `source` is `None` when ingestion happens only through the webhook.
    pub fn new(
        source: Option<Box<dyn UpdateSource>>,
        messages: Arc<dyn MessageStore>,
        dispatcher: Arc<Dispatcher>,
        reconcile_batch: usize,
    ) -> Self {
        let (state, _) = watch::channel(DaemonState::Idle);
        Self {
            source,
            messages,
            dispatcher,
            reconcile_batch: reconcile_batch.max(1),
            carry: Vec::new(),
            state: Arc::new(state),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    /// Once `Stopping` is published, cycle states no longer replace it.
    pub(crate) fn set_state(&self, state: DaemonState) {
        publish(&self.state, state);
    }

    /// Publishing handle usable while a cycle holds `&mut self`.
    pub(crate) fn state_sender(&self) -> Arc<watch::Sender<DaemonState>> {
        Arc::clone(&self.state)
    }

    /// Candidates waiting to be persisted.
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    /// Run one full cycle. A store error aborts the cycle before anything
    /// (further) is dispatched; unpersisted candidates are kept for the next
    /// cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let result = self.run_cycle_inner().await;
        self.set_state(DaemonState::Idle);
        result
    }

    async fn run_cycle_inner(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.set_state(DaemonState::Polling);
        if let Some(source) = self.source.as_mut() {
            let polled = source.poll().await;
            report.polled = polled.len();
            self.carry.extend(polled);
        }

        self.persist_carry(&mut report).await?;

        self.set_state(DaemonState::Dispatching);
        self.dispatch_pending(&mut report).await?;

        Ok(report)
    }

    async fn persist_carry(&mut self, report: &mut CycleReport) -> Result<()> {
        let mut persisted = 0;
        let mut failure = None;

        for candidate in &self.carry {
            match self.messages.upsert_if_absent(candidate).await {
                Ok(outcome) if outcome.is_new => {
                    report.new_messages += 1;
                    persisted += 1;
                    debug!(source_message_id = %candidate.source_message_id, "new message");
                },
                Ok(_) => {
                    report.duplicates += 1;
                    persisted += 1;
                },
                Err(e) => {
                    failure = Some(e);
                    break;
                },
            }
        }

        #[cfg(feature = "metrics")]
        {
            counter!(ingest_metrics::MESSAGES_NEW_TOTAL).increment(report.new_messages as u64);
            counter!(ingest_metrics::MESSAGES_DUPLICATE_TOTAL).increment(report.duplicates as u64);
        }

        self.carry.drain(..persisted);

        match failure {
            None => Ok(()),
            Some(e) => {
                warn!(
                    error = %e,
                    carried = self.carry.len(),
                    "persisting messages failed, aborting cycle before dispatch"
                );
                Err(e.into())
            },
        }
    }

    async fn dispatch_pending(&self, report: &mut CycleReport) -> Result<()> {
        let pending = self
            .messages
            .pending_unnotified(self.reconcile_batch)
            .await?;

        #[cfg(feature = "metrics")]
        gauge!(beacon_metrics::cycle::PENDING_MESSAGES).set(pending.len() as f64);

        for message in &pending {
            match self.dispatcher.dispatch(message).await? {
                DispatchOutcome::Delivered(_) => report.dispatched += 1,
                DispatchOutcome::NoSubscribers => {
                    report.dispatched += 1;
                    report.without_subscribers += 1;
                },
                DispatchOutcome::AlreadyInFlight | DispatchOutcome::AlreadyNotified => {
                    report.skipped += 1;
                },
            }
        }
        Ok(())
    }

    /// Dispatch whatever is pending without polling; run once at startup.
    pub async fn reconcile(&mut self) -> Result<usize> {
        self.set_state(DaemonState::Dispatching);
        let mut report = CycleReport::default();
        let result = self.dispatch_pending(&mut report).await;
        self.set_state(DaemonState::Idle);
        result?;

        if report.dispatched > 0 {
            info!(dispatched = report.dispatched, "startup reconciliation dispatched pending messages");
        }
        Ok(report.dispatched)
    }
}
