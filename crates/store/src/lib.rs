//! Durable message log and push subscriber registry.
//!
//! Messages are deduplicated on their source id and carry a monotonic
//! `notified` flag. Subscriptions are keyed by push endpoint.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    store::{MessageStore, SubscriberRegistry},
    store_memory::InMemoryStore,
    store_sqlite::SqliteStore,
    types::{Message, NewMessage, Subscription, UpsertOutcome},
};

/// Run database migrations for the `messages` and `subscriptions` tables.
///
/// [`SqliteStore::new`] calls this; use it directly with
/// [`SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
