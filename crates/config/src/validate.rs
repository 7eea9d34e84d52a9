//! Semantic validation of a loaded configuration.
//!
//! Which sections are mandatory depends on the command being run: `--status`
//! only reads, `--test` needs push keys but no bot token, the daemon needs
//! everything its ingest mode uses.

use std::net::SocketAddr;

use secrecy::ExposeSecret;

use crate::schema::BeaconConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "push.vapid_private_key".
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Sections a command needs to be fully configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    /// VAPID keys must be present.
    pub push: bool,
    /// The ingest mode's sources must be usable (token, webhook bind).
    pub ingest: bool,
}

impl Requirements {
    /// Continuous daemon or a single cycle.
    pub const DAEMON: Self = Self {
        push: true,
        ingest: true,
    };
    /// `--test`, `--send`, `--cleanup`.
    pub const PUSH_ONLY: Self = Self {
        push: true,
        ingest: false,
    };
    /// `--status`.
    pub const READ_ONLY: Self = Self {
        push: false,
        ingest: false,
    };
}

/// Validate `config` for a command with the given requirements.
#[must_use]
pub fn validate(config: &BeaconConfig, requirements: Requirements) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.database.url.trim().is_empty() {
        result.error("database.url", "must not be empty");
    }
    if config.database.max_connections == 0 {
        result.error("database.max_connections", "must be at least 1");
    }

    check_push(config, requirements, &mut result);
    check_telegram(config, requirements, &mut result);

    if config.daemon.poll_interval_secs == 0 {
        result.error("daemon.poll_interval_secs", "must be at least 1");
    }
    if config.daemon.reconcile_batch == 0 {
        result.error("daemon.reconcile_batch", "must be at least 1");
    }

    if config.notification.default_channel.trim().is_empty() {
        result.error("notification.default_channel", "must not be empty");
    }
    if config.notification.body_max_chars == 0 {
        result.error("notification.body_max_chars", "must be at least 1");
    }

    let mut route_ids: Vec<&String> = config.channels.keys().collect();
    route_ids.sort();
    for id in route_ids {
        let route = &config.channels[id];
        if route.channel_key.trim().is_empty() {
            result.error(&format!("channels.{id}.channel_key"), "must not be empty");
        }
        if route.display_name.trim().is_empty() {
            result.warn(
                &format!("channels.{id}.display_name"),
                "empty display name produces an untitled notification",
            );
        }
    }

    result
}

fn check_push(config: &BeaconConfig, requirements: Requirements, result: &mut ValidationResult) {
    let push = &config.push;

    if push.concurrency == 0 {
        result.error("push.concurrency", "must be at least 1");
    }
    if push.ttl_secs == 0 {
        result.warn(
            "push.ttl_secs",
            "0 means offline devices never receive the notification",
        );
    }
    if !(push.subject.starts_with("mailto:") || push.subject.starts_with("https:")) {
        result.warn(
            "push.subject",
            "VAPID subject should be a mailto: or https: URI",
        );
    }

    if !requirements.push {
        return;
    }

    match &push.vapid_private_key {
        None => result.error(
            "push.vapid_private_key",
            "missing (set it in the config file or VAPID_PRIVATE_KEY)",
        ),
        Some(key) if key.expose_secret().contains("${") => result.error(
            "push.vapid_private_key",
            "contains an unresolved ${...} placeholder",
        ),
        Some(_) => {},
    }
    match push.vapid_public_key.as_deref() {
        None | Some("") => result.error(
            "push.vapid_public_key",
            "missing (set it in the config file or VAPID_PUBLIC_KEY)",
        ),
        Some(key) if key.contains("${") => result.error(
            "push.vapid_public_key",
            "contains an unresolved ${...} placeholder",
        ),
        Some(_) => {},
    }
}

fn check_telegram(config: &BeaconConfig, requirements: Requirements, result: &mut ValidationResult) {
    let telegram = &config.telegram;

    if telegram.batch_limit == 0 || telegram.batch_limit > 100 {
        result.error("telegram.batch_limit", "must be between 1 and 100");
    }
    if telegram.request_timeout_secs <= u64::from(telegram.poll_timeout_secs) {
        result.warn(
            "telegram.request_timeout_secs",
            "should exceed poll_timeout_secs or long polls will time out client-side",
        );
    }

    if !requirements.ingest {
        return;
    }

    if telegram.mode.polls() {
        match &telegram.token {
            None => result.error(
                "telegram.token",
                "missing (set it in the config file or TELEGRAM_BOT_TOKEN)",
            ),
            Some(token) if token.expose_secret().contains("${") => result.error(
                "telegram.token",
                "contains an unresolved ${...} placeholder",
            ),
            Some(_) => {},
        }
    }

    if telegram.mode.serves_webhook() {
        let webhook = &config.webhook;
        if webhook.bind.parse::<SocketAddr>().is_err() {
            result.error(
                "webhook.bind",
                format!("not a socket address: {}", webhook.bind),
            );
        }
        if !webhook.path.starts_with('/') {
            result.error("webhook.path", "must start with '/'");
        }
        if webhook.secret_token.is_none() {
            result.warn(
                "webhook.secret_token",
                "not set; anyone who can reach the endpoint can inject posts",
            );
        }
    }
}
