/// Config schema types (push, database, telegram ingestion, daemon, routing).
use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub push: PushConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub daemon: DaemonConfig,
    pub notification: NotificationConfig,
    pub webhook: WebhookConfig,
    pub metrics: MetricsConfig,
    /// Channel routes keyed by external channel id (chat username or numeric
    /// chat id rendered as a string).
    pub channels: HashMap<String, ChannelRoute>,
}

impl BeaconConfig {
    /// Look up the route for a chat, trying the username before the id.
    pub fn route_for(&self, username: Option<&str>, chat_id: i64) -> Option<&ChannelRoute> {
        username
            .filter(|u| !u.is_empty())
            .and_then(|u| self.channels.get(u))
            .or_else(|| self.channels.get(&chat_id.to_string()))
    }
}

/// Web Push (VAPID) settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Base64url uncompressed P-256 public key, as handed to browsers.
    pub vapid_public_key: Option<String>,
    /// Base64url raw 32-byte P-256 private scalar.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub vapid_private_key: Option<Secret<String>>,
    /// VAPID `sub` claim (`mailto:` or `https:` URI).
    pub subject: String,
    /// `TTL` header in seconds.
    pub ttl_secs: u32,
    /// Maximum concurrent sends during one fan-out.
    pub concurrency: usize,
    /// HTTP timeout per push request.
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for PushConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushConfig")
            .field("vapid_public_key", &self.vapid_public_key)
            .field(
                "vapid_private_key",
                &self.vapid_private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("subject", &self.subject)
            .field("ttl_secs", &self.ttl_secs)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_public_key: None,
            vapid_private_key: None,
            subject: "mailto:admin@example.com".into(),
            ttl_secs: 86_400,
            concurrency: 8,
            request_timeout_secs: 10,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://beacon.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// Which ingestion strategies are active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Long-poll `getUpdates` every cycle.
    #[default]
    Polling,
    /// Receive updates on the webhook endpoint only.
    Webhook,
    /// Run both. No ordering guarantee between the two paths.
    Both,
}

impl IngestMode {
    #[must_use]
    pub fn polls(self) -> bool {
        matches!(self, Self::Polling | Self::Both)
    }

    #[must_use]
    pub fn serves_webhook(self) -> bool {
        matches!(self, Self::Webhook | Self::Both)
    }
}

/// Telegram Bot API ingestion settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    /// Bot API base URL (overridable for tests and self-hosted API servers).
    pub api_base: String,
    pub mode: IngestMode,
    /// Maximum updates per `getUpdates` call (1..=100).
    pub batch_limit: u8,
    /// Server-side long-poll timeout in seconds.
    pub poll_timeout_secs: u32,
    /// Client-side HTTP timeout; must exceed `poll_timeout_secs`.
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("mode", &self.mode)
            .field("batch_limit", &self.batch_limit)
            .finish_non_exhaustive()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.telegram.org".into(),
            mode: IngestMode::default(),
            batch_limit: 100,
            poll_timeout_secs: 5,
            request_timeout_secs: 15,
        }
    }
}

/// Cycle scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between the end of one cycle and the start of the next.
    pub poll_interval_secs: u64,
    /// Maximum pending messages picked up by one reconciliation pass.
    pub reconcile_batch: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            reconcile_batch: 100,
        }
    }
}

/// What to do when a subscription has no flag for the channel being
/// dispatched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMatch {
    /// A missing flag means "not subscribed".
    #[default]
    Strict,
    /// A missing flag means "subscribed".
    DefaultAllSubscribed,
}

/// Notification payload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel_match: ChannelMatch,
    /// Channel key used for unconfigured chats, `--test` and `--send`.
    pub default_channel: String,
    /// Prepended to the channel display name in the notification title.
    pub title_prefix: String,
    /// Body is truncated to this many characters.
    pub body_max_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Click-through URL; `{channel}` is replaced with the channel key.
    pub url_template: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_match: ChannelMatch::default(),
            default_channel: "trades".into(),
            title_prefix: String::new(),
            body_max_chars: 120,
            icon: None,
            badge: None,
            url_template: "/?channel={channel}&from=push".into(),
        }
    }
}

/// Webhook HTTP endpoint settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind: String,
    pub path: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_token: Option<Secret<String>>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("bind", &self.bind)
            .field("path", &self.path)
            .field(
                "secret_token",
                &self.secret_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".into(),
            path: "/webhook/telegram".into(),
            secret_token: None,
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

/// Priority of a channel's notifications.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    High,
    Normal,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Static route from an external channel to a notification channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRoute {
    pub display_name: String,
    /// Notification channel key, matched against subscription flags.
    #[serde(alias = "channel")]
    pub channel_key: String,
    #[serde(default)]
    pub priority: Priority,
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_str(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = BeaconConfig::default();
        assert_eq!(cfg.daemon.poll_interval_secs, 30);
        assert_eq!(cfg.push.ttl_secs, 86_400);
        assert_eq!(cfg.telegram.batch_limit, 100);
        assert_eq!(cfg.notification.channel_match, ChannelMatch::Strict);
        assert_eq!(cfg.notification.default_channel, "trades");
        assert!(cfg.channels.is_empty());
    }

    #[test]
    fn deserialize_channels_and_policy() {
        let raw = r#"
            [notification]
            channel_match = "default_all_subscribed"

            [channels.bullmoneywebsite]
            display_name = "FREE TRADES"
            channel = "trades"
            priority = "high"

            [channels."-1003442830926"]
            display_name = "VIP TRADES"
            channel_key = "vip"
        "#;
        let cfg: BeaconConfig = toml::from_str(raw).unwrap();
        assert_eq!(
            cfg.notification.channel_match,
            ChannelMatch::DefaultAllSubscribed
        );
        let route = cfg.route_for(Some("bullmoneywebsite"), 1).unwrap();
        assert_eq!(route.channel_key, "trades");
        let vip = cfg.route_for(None, -1_003_442_830_926).unwrap();
        assert_eq!(vip.channel_key, "vip");
        assert_eq!(vip.priority, Priority::High);
    }

    #[test]
    fn route_prefers_username_over_id() {
        let mut cfg = BeaconConfig::default();
        cfg.channels.insert("news".into(), ChannelRoute {
            display_name: "News".into(),
            channel_key: "main".into(),
            priority: Priority::Normal,
        });
        cfg.channels.insert("42".into(), ChannelRoute {
            display_name: "Other".into(),
            channel_key: "shop".into(),
            priority: Priority::Normal,
        });
        assert_eq!(cfg.route_for(Some("news"), 42).unwrap().channel_key, "main");
        assert_eq!(cfg.route_for(Some(""), 42).unwrap().channel_key, "shop");
        assert!(cfg.route_for(Some("unknown"), 7).is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = TelegramConfig {
            token: Some(Secret::new("123:ABC".into())),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("123:ABC"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
