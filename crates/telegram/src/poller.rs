//! Long-polling ingestion with an explicit update cursor.

use {
    async_trait::async_trait,
    beacon_store::NewMessage,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use beacon_metrics::{counter, ingest as ingest_metrics, labels};

use crate::{Normalizer, TelegramClient, types::Update};

/// A source of candidate messages.
///
/// Implementations recover from their own transient failures and return an
/// empty batch instead of an error.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn poll(&mut self) -> Vec<NewMessage>;
}

/// Highest `update_id` already consumed. Zero means nothing consumed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCursor {
    pub last_update_id: i64,
}

impl UpdateCursor {
    /// `offset` for the next `getUpdates`, `None` before the first update.
    pub fn next_offset(self) -> Option<i64> {
        (self.last_update_id > 0).then_some(self.last_update_id + 1)
    }

    /// Move forward to `update_id`; never moves back.
    pub fn advance(&mut self, update_id: i64) {
        self.last_update_id = self.last_update_id.max(update_id);
    }
}

/// `getUpdates` parameters.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// 1..=100.
    pub limit: u8,
    /// Server-side long-poll timeout.
    pub timeout_secs: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout_secs: 5,
        }
    }
}

/// Polls a bot for channel posts.
pub struct ChannelPoller {
    client: TelegramClient,
    normalizer: Normalizer,
    settings: PollSettings,
    cursor: UpdateCursor,
}

impl ChannelPoller {
    pub fn new(client: TelegramClient, normalizer: Normalizer, settings: PollSettings) -> Self {
        Self {
            client,
            normalizer,
            settings,
            cursor: UpdateCursor::default(),
        }
    }

    /// Resume from a known cursor.
    #[must_use]
    pub fn with_cursor(mut self, cursor: UpdateCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> UpdateCursor {
        self.cursor
    }

    /// Parse and normalize raw updates, advancing the cursor past every
    /// update whose id is readable.
    fn ingest(&mut self, raw_updates: Vec<serde_json::Value>) -> Vec<NewMessage> {
        let mut messages = Vec::new();

        for raw in raw_updates {
            let update_id = raw.get("update_id").and_then(serde_json::Value::as_i64);

            let update: Update = match serde_json::from_value(raw) {
                Ok(update) => update,
                Err(e) => {
                    warn!(?update_id, error = %e, "dropping malformed telegram update");
                    #[cfg(feature = "metrics")]
                    counter!(ingest_metrics::MALFORMED_TOTAL).increment(1);
                    if let Some(id) = update_id {
                        self.cursor.advance(id);
                    }
                    continue;
                },
            };

            self.cursor.advance(update.update_id);
            match self.normalizer.normalize_update(&update) {
                Some(message) => messages.push(message),
                None => debug!(update_id = update.update_id, "update carries no post content"),
            }
        }

        messages
    }
}

#[async_trait]
impl UpdateSource for ChannelPoller {
    async fn poll(&mut self) -> Vec<NewMessage> {
        let offset = self.cursor.next_offset();
        let raw_updates = match self
            .client
            .get_updates(offset, self.settings.limit, self.settings.timeout_secs)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, ?offset, "telegram poll failed, will retry next cycle");
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::POLL_ERRORS_TOTAL).increment(1);
                return Vec::new();
            },
        };

        #[cfg(feature = "metrics")]
        counter!(ingest_metrics::UPDATES_TOTAL, labels::SOURCE => "polling")
            .increment(raw_updates.len() as u64);

        let messages = self.ingest(raw_updates);
        debug!(
            messages = messages.len(),
            cursor = self.cursor.last_update_id,
            "telegram poll complete"
        );
        messages
    }
}
