use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use {
    beacon_config::{BeaconConfig, ChannelMatch},
    beacon_push::{DeliveryResult, PushPayload, PushSender},
    beacon_store::{Message, MessageStore, SubscriberRegistry, Subscription},
    chrono::Utc,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use {
    beacon_metrics::{counter, cycle as cycle_metrics, histogram, labels, push as push_metrics},
    std::time::Instant,
};

use crate::{
    Result,
    fanout::{FanOutReport, fan_out},
    payload::PayloadTemplate,
};

/// Dispatcher settings derived from configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum concurrent sends per fan-out.
    pub concurrency: usize,
    pub channel_match: ChannelMatch,
    pub template: PayloadTemplate,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            channel_match: ChannelMatch::default(),
            template: PayloadTemplate::default(),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &BeaconConfig) -> Self {
        Self {
            concurrency: config.push.concurrency.max(1),
            channel_match: config.notification.channel_match,
            template: PayloadTemplate::from_config(&config.notification),
        }
    }
}

/// What happened to one message handed to [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Fanned out and marked notified.
    Delivered(FanOutReport),
    /// No subscriber wanted the channel; marked notified anyway.
    NoSubscribers,
    /// Another task is dispatching the same message right now.
    AlreadyInFlight,
    /// Another task finished dispatching it first.
    AlreadyNotified,
}

/// Result of [`Dispatcher::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub total: usize,
    pub alive: usize,
    pub removed: usize,
    /// Failed, but not permanently (auth or transient errors).
    pub kept: usize,
}

/// Releases an in-flight claim on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Turns stored messages into push deliveries.
pub struct Dispatcher {
    messages: Arc<dyn MessageStore>,
    registry: Arc<dyn SubscriberRegistry>,
    sender: Arc<dyn PushSender>,
    settings: DispatchSettings,
    in_flight: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        registry: Arc<dyn SubscriberRegistry>,
        sender: Arc<dyn PushSender>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            messages,
            registry,
            sender,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    fn try_claim(&self, source_message_id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(source_message_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            key: source_message_id.to_string(),
        })
    }

    /// Deliver one message to its channel's subscribers and mark it notified.
    ///
    /// Delivery failures never fail this call; only a store error does, in
    /// which case the message stays pending for the next reconciliation.
    pub async fn dispatch(&self, message: &Message) -> Result<DispatchOutcome> {
        let Some(_guard) = self.try_claim(&message.source_message_id) else {
            debug!(
                source_message_id = %message.source_message_id,
                "message already being dispatched, skipping"
            );
            return Ok(DispatchOutcome::AlreadyInFlight);
        };

        // The caller's copy may predate a dispatch that completed meanwhile.
        if self
            .messages
            .get_message(&message.source_message_id)
            .await?
            .is_some_and(|stored| stored.notified)
        {
            return Ok(DispatchOutcome::AlreadyNotified);
        }

        let subscribers = self
            .registry
            .list_active(&message.channel_key, self.settings.channel_match)
            .await?;

        let outcome = if subscribers.is_empty() {
            info!(
                channel = %message.channel_key,
                source_message_id = %message.source_message_id,
                "no active subscribers for channel, marking notified"
            );
            DispatchOutcome::NoSubscribers
        } else {
            let payload = self.settings.template.for_message(message);
            info!(
                channel = %message.channel_key,
                source_message_id = %message.source_message_id,
                subscribers = subscribers.len(),
                "dispatching notification"
            );
            let report = self.deliver(subscribers, &payload).await;
            info!(
                channel = %message.channel_key,
                sent = report.sent,
                failed = report.failed(),
                removed = report.removed,
                "fan-out complete"
            );
            DispatchOutcome::Delivered(report)
        };

        if !self
            .messages
            .mark_notified(&message.source_message_id)
            .await?
        {
            debug!(
                source_message_id = %message.source_message_id,
                "message was already marked notified"
            );
        }

        #[cfg(feature = "metrics")]
        counter!(cycle_metrics::MESSAGES_DISPATCHED_TOTAL, labels::CHANNEL => message.channel_key.clone())
            .increment(1);

        Ok(outcome)
    }

    /// Fan out and apply the subscription lifecycle rules to every result.
    async fn deliver(&self, subscribers: Vec<Subscription>, payload: &PushPayload) -> FanOutReport {
        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let results = fan_out(
            self.sender.as_ref(),
            subscribers,
            payload,
            self.settings.concurrency,
        )
        .await;

        #[cfg(feature = "metrics")]
        histogram!(push_metrics::FANOUT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let mut report = FanOutReport::default();
        for (sub, result) in &results {
            report.record(result);
            #[cfg(feature = "metrics")]
            counter!(push_metrics::DELIVERIES_TOTAL, labels::OUTCOME => result.label()).increment(1);

            match result {
                DeliveryResult::Sent => {},
                DeliveryResult::ExpiredEndpoint => {
                    info!(endpoint = sub.short_endpoint(), "subscription expired, removing");
                },
                DeliveryResult::KeyMismatch => {
                    warn!(
                        endpoint = sub.short_endpoint(),
                        "subscription rejected our VAPID key, removing"
                    );
                },
                DeliveryResult::AuthInvalid => {
                    error!(
                        endpoint = sub.short_endpoint(),
                        "push service rejected VAPID credentials (401); check push.vapid_private_key and push.subject"
                    );
                },
                DeliveryResult::TransientError { status, reason } => {
                    warn!(
                        endpoint = sub.short_endpoint(),
                        ?status,
                        reason = %reason,
                        "push delivery failed"
                    );
                },
            }

            if result.removes_subscription() && self.remove(sub).await {
                report.removed += 1;
            }
        }

        if report.key_mismatch > 0 {
            error!(
                count = report.key_mismatch,
                "push services rejected subscriptions with 403: the VAPID key pair changed since they subscribed; affected browsers must re-subscribe"
            );
        }

        report
    }

    /// Delete a dead subscription. Failures are logged; the row will be
    /// retried the next time it fails.
    async fn remove(&self, sub: &Subscription) -> bool {
        match self.registry.delete(&sub.endpoint).await {
            Ok(removed) => {
                #[cfg(feature = "metrics")]
                if removed {
                    counter!(push_metrics::SUBSCRIPTIONS_REMOVED_TOTAL).increment(1);
                }
                removed
            },
            Err(e) => {
                warn!(endpoint = sub.short_endpoint(), error = %e, "failed to delete subscription");
                false
            },
        }
    }

    /// Operator broadcast to a channel, bypassing the message store.
    pub async fn broadcast(
        &self,
        channel_key: &str,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<FanOutReport> {
        let payload = self
            .settings
            .template
            .manual(channel_key, title, body, url, Utc::now());
        self.push_to_channel(channel_key, &payload).await
    }

    /// Synthetic notification to a channel's subscribers.
    pub async fn test_push(&self, channel_key: &str) -> Result<FanOutReport> {
        let payload = self.settings.template.test(channel_key, Utc::now());
        self.push_to_channel(channel_key, &payload).await
    }

    async fn push_to_channel(&self, channel_key: &str, payload: &PushPayload) -> Result<FanOutReport> {
        let subscribers = self
            .registry
            .list_active(channel_key, self.settings.channel_match)
            .await?;
        if subscribers.is_empty() {
            warn!(channel = %channel_key, "no active subscribers for channel");
            return Ok(FanOutReport::default());
        }

        info!(
            channel = %channel_key,
            subscribers = subscribers.len(),
            title = %payload.title,
            "sending notification"
        );
        let report = self.deliver(subscribers, payload).await;
        info!(
            sent = report.sent,
            failed = report.failed(),
            removed = report.removed,
            "send complete"
        );
        Ok(report)
    }

    /// Probe every subscription (active or not) with a silent push and delete
    /// the permanently dead ones.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let subscriptions = self.registry.list_all().await?;
        let mut report = CleanupReport {
            total: subscriptions.len(),
            ..Default::default()
        };
        if subscriptions.is_empty() {
            info!("no subscriptions to clean up");
            return Ok(report);
        }

        info!(total = report.total, "probing subscriptions");
        let payload = self.settings.template.probe();
        let results = fan_out(
            self.sender.as_ref(),
            subscriptions,
            &payload,
            self.settings.concurrency,
        )
        .await;

        for (sub, result) in &results {
            let user_agent: String = sub
                .user_agent
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(40)
                .collect();
            if result.is_sent() {
                report.alive += 1;
                info!(endpoint = sub.short_endpoint(), user_agent = %user_agent, "alive");
            } else if result.removes_subscription() {
                if self.remove(sub).await {
                    report.removed += 1;
                }
                info!(
                    endpoint = sub.short_endpoint(),
                    user_agent = %user_agent,
                    result = result.label(),
                    "removed"
                );
            } else {
                report.kept += 1;
                warn!(
                    endpoint = sub.short_endpoint(),
                    user_agent = %user_agent,
                    result = %result,
                    "kept after failure"
                );
            }
        }

        info!(
            alive = report.alive,
            removed = report.removed,
            kept = report.kept,
            "cleanup complete"
        );
        Ok(report)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use {
        super::*,
        async_trait::async_trait,
        beacon_config::Priority,
        beacon_push::classify_status,
        beacon_store::{InMemoryStore, NewMessage},
    };

    /// Answers per endpoint (default `Sent`) and records every attempt.
    #[derive(Default)]
    struct ScriptedSender {
        results: HashMap<String, DeliveryResult>,
        calls: Mutex<Vec<(String, PushPayload)>>,
    }

    impl ScriptedSender {
        fn with(mut self, endpoint: &str, result: DeliveryResult) -> Self {
            self.results.insert(endpoint.to_string(), result);
            self
        }

        fn endpoints(&self) -> Vec<String> {
            let mut endpoints: Vec<_> = self
                .calls
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.clone())
                .collect();
            endpoints.sort();
            endpoints
        }
    }

    #[async_trait]
    impl PushSender for ScriptedSender {
        async fn send(&self, sub: &Subscription, payload: &PushPayload) -> DeliveryResult {
            self.calls
                .lock()
                .unwrap()
                .push((sub.endpoint.clone(), payload.clone()));
            self.results
                .get(&sub.endpoint)
                .cloned()
                .unwrap_or(DeliveryResult::Sent)
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        sender: Arc<ScriptedSender>,
        dispatcher: Dispatcher,
    }

    fn harness(sender: ScriptedSender) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let sender = Arc::new(sender);
        let dispatcher = Dispatcher::new(
            store.clone(),
            store.clone(),
            sender.clone(),
            DispatchSettings::default(),
        );
        Harness {
            store,
            sender,
            dispatcher,
        }
    }

    async fn subscribe(store: &InMemoryStore, endpoint: &str, channel: &str) {
        store
            .upsert(&Subscription::new(endpoint, "k", "a").with_channel(channel, true))
            .await
            .unwrap();
    }

    async fn ingest(store: &InMemoryStore, id: &str) -> Message {
        store
            .upsert_if_absent(&NewMessage {
                source_message_id: id.into(),
                channel_key: "trades".into(),
                channel_title: "FREE TRADES".into(),
                priority: Priority::High,
                body: "BTC long".into(),
                has_media: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
            .message
    }

    #[tokio::test]
    async fn delivers_to_channel_subscribers_and_marks() {
        let h = harness(ScriptedSender::default());
        subscribe(&h.store, "e1", "trades").await;
        subscribe(&h.store, "e2", "trades").await;
        subscribe(&h.store, "e3", "main").await;
        let msg = ingest(&h.store, "1:1").await;

        let outcome = h.dispatcher.dispatch(&msg).await.unwrap();

        let DispatchOutcome::Delivered(report) = outcome else {
            panic!("expected delivery, got {outcome:?}");
        };
        assert_eq!(report.sent, 2);
        assert_eq!(h.sender.endpoints(), vec!["e1", "e2"]);
        assert!(h.store.get_message("1:1").await.unwrap().unwrap().notified);

        let calls = h.sender.calls.lock().unwrap();
        assert_eq!(calls[0].1.tag, "trades-1:1");
        assert_eq!(calls[0].1, calls[1].1);
    }

    #[tokio::test]
    async fn zero_subscribers_still_marks() {
        let h = harness(ScriptedSender::default());
        let msg = ingest(&h.store, "1:1").await;

        let outcome = h.dispatcher.dispatch(&msg).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::NoSubscribers);
        assert!(h.store.pending_unnotified(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn permanent_failures_are_deleted() {
        let h = harness(
            ScriptedSender::default()
                .with("gone", DeliveryResult::ExpiredEndpoint)
                .with("rotated", DeliveryResult::KeyMismatch)
                .with("auth", DeliveryResult::AuthInvalid)
                .with("flaky", classify_status(503, "")),
        );
        for e in ["ok", "gone", "rotated", "auth", "flaky"] {
            subscribe(&h.store, e, "trades").await;
        }
        let msg = ingest(&h.store, "1:1").await;

        let DispatchOutcome::Delivered(report) = h.dispatcher.dispatch(&msg).await.unwrap() else {
            panic!("expected delivery");
        };

        assert_eq!(report.attempted, 5);
        assert_eq!(report.sent, 1);
        assert_eq!(report.removed, 2);
        let remaining: Vec<_> = h
            .store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert_eq!(remaining, vec!["auth", "flaky", "ok"]);
        assert!(h.store.get_message("1:1").await.unwrap().unwrap().notified);

        // Removed subscriptions never come back for the next message.
        let next = ingest(&h.store, "1:2").await;
        h.dispatcher.dispatch(&next).await.unwrap();
        let gone_calls = h
            .sender
            .endpoints()
            .into_iter()
            .filter(|e| e == "gone")
            .count();
        assert_eq!(gone_calls, 1);
    }

    #[tokio::test]
    async fn in_flight_message_is_skipped() {
        let h = harness(ScriptedSender::default());
        subscribe(&h.store, "e1", "trades").await;
        let msg = ingest(&h.store, "1:1").await;

        let guard = h.dispatcher.try_claim("1:1").unwrap();
        assert_eq!(
            h.dispatcher.dispatch(&msg).await.unwrap(),
            DispatchOutcome::AlreadyInFlight
        );
        assert!(h.sender.endpoints().is_empty());

        drop(guard);
        assert!(matches!(
            h.dispatcher.dispatch(&msg).await.unwrap(),
            DispatchOutcome::Delivered(_)
        ));

        // A stale copy of the message is not sent twice.
        assert_eq!(
            h.dispatcher.dispatch(&msg).await.unwrap(),
            DispatchOutcome::AlreadyNotified
        );
        assert_eq!(h.sender.endpoints(), vec!["e1"]);
    }

    #[tokio::test]
    async fn cleanup_removes_only_permanent_failures() {
        let h = harness(
            ScriptedSender::default()
                .with("e2", DeliveryResult::ExpiredEndpoint)
                .with("e4", DeliveryResult::ExpiredEndpoint)
                .with("e5", DeliveryResult::AuthInvalid),
        );
        for e in ["e1", "e2", "e3", "e4", "e5"] {
            subscribe(&h.store, e, "trades").await;
        }
        h.store.deactivate("e3").await.unwrap();

        let report = h.dispatcher.cleanup().await.unwrap();

        assert_eq!(report, CleanupReport {
            total: 5,
            alive: 2,
            removed: 2,
            kept: 1,
        });
        assert_eq!(h.store.list_all().await.unwrap().len(), 3);
        let calls = h.sender.calls.lock().unwrap();
        assert!(calls.iter().all(|(_, p)| p.silent));
    }

    #[tokio::test]
    async fn broadcast_bypasses_store() {
        let h = harness(ScriptedSender::default());
        subscribe(&h.store, "e1", "main").await;
        subscribe(&h.store, "e2", "trades").await;

        let report = h
            .dispatcher
            .broadcast("main", "Hello", "World", Some("/news"))
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(h.sender.endpoints(), vec!["e1"]);
        let calls = h.sender.calls.lock().unwrap();
        assert_eq!(calls[0].1.url, "/news");
        assert!(calls[0].1.tag.starts_with("custom-"));
        assert_eq!(h.store.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_without_subscribers_is_empty() {
        let h = harness(ScriptedSender::default());
        let report = h.dispatcher.test_push("trades").await.unwrap();
        assert_eq!(report, FanOutReport::default());
    }
}
