//! Bounded concurrent delivery of one payload to many subscriptions.

use {
    beacon_push::{DeliveryResult, PushPayload, PushSender},
    beacon_store::Subscription,
    futures::{StreamExt, stream},
};

/// Send `payload` to every subscription with at most `concurrency` requests
/// in flight. Results come back in completion order.
pub async fn fan_out(
    sender: &dyn PushSender,
    subscriptions: Vec<Subscription>,
    payload: &PushPayload,
    concurrency: usize,
) -> Vec<(Subscription, DeliveryResult)> {
    stream::iter(subscriptions)
        .map(|sub| async move {
            let result = sender.send(&sub, payload).await;
            (sub, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Per-outcome tally of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub attempted: usize,
    pub sent: usize,
    pub expired: usize,
    pub key_mismatch: usize,
    pub auth_invalid: usize,
    pub transient: usize,
    /// Subscriptions actually deleted as a consequence.
    pub removed: usize,
}

impl FanOutReport {
    pub fn record(&mut self, result: &DeliveryResult) {
        self.attempted += 1;
        match result {
            DeliveryResult::Sent => self.sent += 1,
            DeliveryResult::ExpiredEndpoint => self.expired += 1,
            DeliveryResult::KeyMismatch => self.key_mismatch += 1,
            DeliveryResult::AuthInvalid => self.auth_invalid += 1,
            DeliveryResult::TransientError { .. } => self.transient += 1,
        }
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.attempted - self.sent
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {super::*, async_trait::async_trait, std::time::Duration};

    /// Tracks the peak number of concurrent sends.
    #[derive(Default)]
    struct PeakSender {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PushSender for PeakSender {
        async fn send(&self, _: &Subscription, _: &PushPayload) -> DeliveryResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            DeliveryResult::Sent
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let sender = PeakSender::default();
        let subs = (0..20)
            .map(|i| Subscription::new(format!("https://push.example/{i}"), "k", "a"))
            .collect();
        let payload = crate::PayloadTemplate::default().probe();

        let results = fan_out(&sender, subs, &payload, 3).await;

        assert_eq!(results.len(), 20);
        assert!(sender.peak.load(Ordering::SeqCst) <= 3);
        assert!(results.iter().all(|(_, r)| r.is_sent()));
    }

    #[test]
    fn report_tallies() {
        let mut report = FanOutReport::default();
        report.record(&DeliveryResult::Sent);
        report.record(&DeliveryResult::ExpiredEndpoint);
        report.record(&beacon_push::classify_status(503, ""));
        assert_eq!(report.attempted, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.transient, 1);
    }
}
