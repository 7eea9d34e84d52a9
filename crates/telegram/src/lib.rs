//! Telegram channel-post ingestion.
//!
//! Turns `channel_post` / `edited_channel_post` updates into
//! [`beacon_store::NewMessage`] candidates, either by long-polling
//! `getUpdates` ([`ChannelPoller`]) or from webhook deliveries
//! ([`WebhookAdapter`]).

pub mod client;
pub mod error;
pub mod normalize;
pub mod poller;
pub mod types;
pub mod webhook;

pub use {
    client::TelegramClient,
    error::{Error, Result},
    normalize::Normalizer,
    poller::{ChannelPoller, PollSettings, UpdateCursor, UpdateSource},
    webhook::WebhookAdapter,
};
