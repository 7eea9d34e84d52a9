//! Read-only health report (`beacon --status`).

use std::{
    fmt,
    path::{Path, PathBuf},
};

use {
    beacon_config::{BeaconConfig, Diagnostic, Requirements, validate},
    beacon_store::{MessageStore, SubscriberRegistry},
    chrono::{Duration as ChronoDuration, Utc},
    serde::Serialize,
};

use crate::runtime;

/// Store-derived counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub active_subscriptions: u64,
    pub pending_messages: u64,
    pub messages_last_hour: u64,
}

/// Outcome of a connectivity or configuration probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Probe<T> {
    NotConfigured,
    Ok(T),
    Failed(String),
}

impl<T> Probe<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub config_path: Option<PathBuf>,
    pub diagnostics: Vec<String>,
    pub config_errors: bool,
    /// Public VAPID key when the pair is valid.
    pub vapid: Probe<String>,
    pub store: Probe<StoreCounts>,
    /// Bot username when `getMe` succeeds.
    pub telegram: Probe<String>,
}

impl StatusReport {
    /// Healthy when nothing configured is failing.
    pub fn is_healthy(&self) -> bool {
        !self.config_errors
            && !self.vapid.is_failed()
            && !self.store.is_failed()
            && !self.telegram.is_failed()
    }
}

/// Gather the report. Never fails: every problem becomes part of the report.
pub async fn collect(config: &BeaconConfig, config_path: Option<&Path>) -> StatusReport {
    let validation = validate(config, Requirements::READ_ONLY);
    let diagnostics = validation
        .diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect();

    let vapid = if config.push.vapid_private_key.is_none() {
        Probe::NotConfigured
    } else {
        match runtime::load_vapid_keys(&config.push) {
            Ok(keys) => Probe::Ok(keys.public_key().to_string()),
            Err(e) => Probe::Failed(e.to_string()),
        }
    };

    let store = match store_counts(config).await {
        Ok(counts) => Probe::Ok(counts),
        Err(e) => Probe::Failed(e.to_string()),
    };

    let telegram = match runtime::telegram_client(config) {
        Ok(None) => Probe::NotConfigured,
        Ok(Some(client)) => match client.get_me().await {
            Ok(me) => Probe::Ok(me.username.unwrap_or(me.first_name)),
            Err(e) => Probe::Failed(e.to_string()),
        },
        Err(e) => Probe::Failed(e.to_string()),
    };

    StatusReport {
        config_path: config_path.map(Path::to_path_buf),
        diagnostics,
        config_errors: validation.has_errors(),
        vapid,
        store,
        telegram,
    }
}

async fn store_counts(config: &BeaconConfig) -> crate::Result<StoreCounts> {
    let store = runtime::open_store(config).await?;
    let counts = StoreCounts {
        active_subscriptions: store.count_active().await?,
        pending_messages: store.count_pending().await?,
        messages_last_hour: store
            .count_since(Utc::now() - ChronoDuration::hours(1))
            .await?,
    };
    store.pool().close().await;
    Ok(counts)
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.config_path {
            Some(path) => writeln!(f, "config:         {}", path.display())?,
            None => writeln!(f, "config:         (defaults and environment)")?,
        }
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {diagnostic}")?;
        }

        match &self.vapid {
            Probe::NotConfigured => writeln!(f, "vapid keys:     not configured")?,
            Probe::Ok(public_key) => {
                let prefix: String = public_key.chars().take(16).collect();
                writeln!(f, "vapid keys:     ok ({prefix}...)")?;
            },
            Probe::Failed(e) => writeln!(f, "vapid keys:     INVALID: {e}")?,
        }

        match &self.store {
            Probe::Ok(counts) => {
                writeln!(f, "database:       ok")?;
                writeln!(f, "  active subscriptions: {}", counts.active_subscriptions)?;
                writeln!(f, "  pending messages:     {}", counts.pending_messages)?;
                writeln!(f, "  messages last hour:   {}", counts.messages_last_hour)?;
            },
            Probe::NotConfigured => writeln!(f, "database:       not configured")?,
            Probe::Failed(e) => writeln!(f, "database:       UNREACHABLE: {e}")?,
        }

        match &self.telegram {
            Probe::NotConfigured => writeln!(f, "telegram:       no bot token")?,
            Probe::Ok(username) => writeln!(f, "telegram:       ok (@{username})")?,
            Probe::Failed(e) => writeln!(f, "telegram:       UNREACHABLE: {e}")?,
        }

        write!(
            f,
            "overall:        {}",
            if self.is_healthy() {
                "healthy"
            } else {
                "degraded"
            }
        )
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, beacon_push::VapidKeys};

    #[tokio::test]
    async fn reports_counts_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BeaconConfig::default();
        config.database.url = format!("sqlite://{}", dir.path().join("status.db").display());
        let keys = VapidKeys::generate();
        config.push.vapid_private_key = Some(keys.export_private_key().clone());

        let report = collect(&config, None).await;

        assert_eq!(report.vapid, Probe::Ok(keys.public_key().to_string()));
        assert_eq!(
            report.store,
            Probe::Ok(StoreCounts {
                active_subscriptions: 0,
                pending_messages: 0,
                messages_last_hour: 0,
            })
        );
        assert_eq!(report.telegram, Probe::NotConfigured);
        assert!(report.is_healthy());
        assert!(report.to_string().ends_with("healthy"));
    }

    #[tokio::test]
    async fn invalid_key_is_degraded() {
        let mut config = BeaconConfig::default();
        config.database.url = "sqlite::memory:".into();
        config.push.vapid_private_key = Some(secrecy::Secret::new("short".into()));

        let report = collect(&config, None).await;

        assert!(report.vapid.is_failed());
        assert!(!report.is_healthy());
        assert!(report.to_string().contains("INVALID"));
    }
}
