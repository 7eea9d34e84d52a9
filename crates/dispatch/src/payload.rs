//! Deterministic payload construction.

use {
    beacon_config::{NotificationConfig, Priority},
    beacon_push::PushPayload,
    beacon_store::Message,
    chrono::{DateTime, Utc},
};

/// Body used when a stored message has no text.
pub const EMPTY_BODY: &str = "New post — tap to view";

const TEST_TITLE: &str = "Test notification";
const TEST_BODY: &str = "✅ Push notifications are working!";
const PROBE_TITLE: &str = "Connection Test";
const PROBE_BODY: &str = "Verifying subscription...";

/// Presentation settings shared by every payload the dispatcher builds.
#[derive(Debug, Clone)]
pub struct PayloadTemplate {
    pub title_prefix: String,
    pub body_max_chars: usize,
    pub icon: Option<String>,
    pub badge: Option<String>,
    /// `{channel}` is replaced with the channel key.
    pub url_template: String,
}

impl Default for PayloadTemplate {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

impl PayloadTemplate {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            title_prefix: config.title_prefix.clone(),
            body_max_chars: config.body_max_chars,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            url_template: config.url_template.clone(),
        }
    }

    pub fn channel_url(&self, channel_key: &str) -> String {
        self.url_template.replace("{channel}", channel_key)
    }

    /// Payload for a stored message. The same message always yields the same
    /// payload.
    pub fn for_message(&self, message: &Message) -> PushPayload {
        let body = if message.body.trim().is_empty() {
            EMPTY_BODY.to_string()
        } else {
            truncate(&message.body, self.body_max_chars)
        };

        PushPayload {
            title: format!("{}{}", self.title_prefix, message.channel_title),
            body,
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            tag: format!("{}-{}", message.channel_key, message.source_message_id),
            url: self.channel_url(&message.channel_key),
            channel: message.channel_key.clone(),
            require_interaction: message.priority == Priority::High,
            silent: false,
        }
    }

    /// Operator-composed notification (`--send`).
    pub fn manual(
        &self,
        channel_key: &str,
        title: &str,
        body: &str,
        url: Option<&str>,
        now: DateTime<Utc>,
    ) -> PushPayload {
        PushPayload {
            title: title.to_string(),
            body: body.to_string(),
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            tag: format!("custom-{}", now.timestamp()),
            url: url.map_or_else(|| "/".to_string(), str::to_string),
            channel: channel_key.to_string(),
            require_interaction: true,
            silent: false,
        }
    }

    /// Synthetic notification (`--test`).
    pub fn test(&self, channel_key: &str, now: DateTime<Utc>) -> PushPayload {
        PushPayload {
            title: format!("{}{TEST_TITLE}", self.title_prefix),
            body: TEST_BODY.to_string(),
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            tag: format!("test-{}", now.timestamp()),
            url: "/".to_string(),
            channel: channel_key.to_string(),
            require_interaction: false,
            silent: false,
        }
    }

    /// Silent probe used by cleanup.
    pub fn probe(&self) -> PushPayload {
        PushPayload {
            title: PROBE_TITLE.to_string(),
            body: PROBE_BODY.to_string(),
            icon: None,
            badge: None,
            tag: "cleanup-test".to_string(),
            url: "/".to_string(),
            channel: String::new(),
            require_interaction: false,
            silent: true,
        }
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `…`.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
