use std::collections::BTreeMap;

use {
    beacon_config::{ChannelMatch, Priority},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// A candidate message produced by ingestion, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Natural key. For Telegram: `"<chat_id>:<message_id>"`.
    pub source_message_id: String,
    pub channel_key: String,
    /// Display name used as the notification title.
    pub channel_title: String,
    pub priority: Priority,
    pub body: String,
    pub has_media: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Row id; increases with ingestion order.
    pub id: i64,
    pub source_message_id: String,
    pub channel_key: String,
    pub channel_title: String,
    pub priority: Priority,
    pub body: String,
    pub has_media: bool,
    pub created_at: DateTime<Utc>,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
}

/// Result of [`crate::MessageStore::upsert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The stored row: freshly inserted, or the pre-existing one.
    pub message: Message,
    pub is_new: bool,
}

/// A registered Web Push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub endpoint: String,
    /// Browser P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
    /// Per-channel opt-in flags; a missing key is resolved by [`ChannelMatch`].
    #[serde(default)]
    pub channel_flags: BTreeMap<String, bool>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Create an active subscription with no channel flags.
    pub fn new(
        endpoint: impl Into<String>,
        p256dh: impl Into<String>,
        auth: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            p256dh: p256dh.into(),
            auth: auth.into(),
            channel_flags: BTreeMap::new(),
            is_active: true,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    /// Builder-style flag setter.
    pub fn with_channel(mut self, channel_key: impl Into<String>, enabled: bool) -> Self {
        self.channel_flags.insert(channel_key.into(), enabled);
        self
    }

    /// Whether this subscription should receive pushes for `channel_key`.
    #[must_use]
    pub fn wants(&self, channel_key: &str, policy: ChannelMatch) -> bool {
        if !self.is_active {
            return false;
        }
        match self.channel_flags.get(channel_key) {
            Some(enabled) => *enabled,
            None => policy == ChannelMatch::DefaultAllSubscribed,
        }
    }

    /// Last characters of the endpoint, for logs.
    #[must_use]
    pub fn short_endpoint(&self) -> &str {
        let start = self
            .endpoint
            .char_indices()
            .rev()
            .nth(29)
            .map_or(0, |(i, _)| i);
        &self.endpoint[start..]
    }
}
