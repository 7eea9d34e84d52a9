//! Persistence traits for messages and subscriptions.

use {
    async_trait::async_trait,
    beacon_config::ChannelMatch,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    types::{Message, NewMessage, Subscription, UpsertOutcome},
};

/// Ingested messages, deduplicated on `source_message_id`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert `msg` unless a row with the same source id exists; return the
    /// stored row either way.
    async fn upsert_if_absent(&self, msg: &NewMessage) -> Result<UpsertOutcome>;

    /// Flip `notified` to true. Returns `false` when it already was (or the
    /// message is unknown); never reverts.
    async fn mark_notified(&self, source_message_id: &str) -> Result<bool>;

    /// Messages with `notified = false`, oldest ingestion first.
    async fn pending_unnotified(&self, limit: usize) -> Result<Vec<Message>>;

    async fn get_message(&self, source_message_id: &str) -> Result<Option<Message>>;

    async fn count_pending(&self) -> Result<u64>;

    /// Messages whose source timestamp is at or after `since`.
    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Push subscriptions keyed by endpoint.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Active subscriptions that opted into `channel_key` under `policy`.
    async fn list_active(&self, channel_key: &str, policy: ChannelMatch)
    -> Result<Vec<Subscription>>;

    /// Every subscription, active or not.
    async fn list_all(&self) -> Result<Vec<Subscription>>;

    async fn get_subscription(&self, endpoint: &str) -> Result<Option<Subscription>>;

    async fn count_active(&self) -> Result<u64>;

    /// Insert or replace by endpoint, keeping the original `created_at`.
    async fn upsert(&self, sub: &Subscription) -> Result<()>;

    /// Soft-disable. Returns whether a row changed.
    async fn deactivate(&self, endpoint: &str) -> Result<bool>;

    /// Hard-delete. Returns whether a row was removed; repeating is a no-op.
    async fn delete(&self, endpoint: &str) -> Result<bool>;
}
