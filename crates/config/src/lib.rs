//! Configuration loading, validation and env substitution.
//!
//! Config files: `beacon.toml`, `beacon.yaml`, or `beacon.json`
//! Searched in `./` then `~/.config/beacon/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, and a fixed set
//! of environment overrides (`VAPID_PRIVATE_KEY`, `TELEGRAM_BOT_TOKEN`, ...).

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{LoadedConfig, apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        BeaconConfig, ChannelMatch, ChannelRoute, DaemonConfig, DatabaseConfig, IngestMode,
        MetricsConfig, NotificationConfig, Priority, PushConfig, TelegramConfig, WebhookConfig,
    },
    validate::{Diagnostic, Requirements, Severity, ValidationResult, validate},
};
