//! SQLite-backed message store and subscriber registry using sqlx.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use {
    async_trait::async_trait,
    beacon_config::{ChannelMatch, Priority},
    chrono::{DateTime, Utc},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
    tracing::{debug, warn},
};

use crate::{
    Result,
    store::{MessageStore, SubscriberRegistry},
    types::{Message, NewMessage, Subscription, UpsertOutcome},
};

const MESSAGE_COLUMNS: &str = "id, source_message_id, channel_key, channel_title, priority, body, \
                               has_media, created_at_ms, notified, notified_at_ms";

const SUBSCRIPTION_COLUMNS: &str =
    "endpoint, p256dh, auth, channel_flags, is_active, user_agent, created_at_ms";

/// SQLite persistence for both relations, sharing one pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a pool for `database_url` and run migrations.
    ///
    /// In-memory URLs get a single connection, since every SQLite memory
    /// connection is its own database.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        crate::run_migrations(&pool).await?;
        debug!(max_connections, "sqlite store ready");

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let priority: String = row.try_get("priority")?;
    Ok(Message {
        id: row.try_get("id")?,
        source_message_id: row.try_get("source_message_id")?,
        channel_key: row.try_get("channel_key")?,
        channel_title: row.try_get("channel_title")?,
        priority: Priority::from_str(&priority).unwrap_or_default(),
        body: row.try_get("body")?,
        has_media: row.try_get("has_media")?,
        created_at: timestamp(row.try_get("created_at_ms")?),
        notified: row.try_get("notified")?,
        notified_at: row
            .try_get::<Option<i64>, _>("notified_at_ms")?
            .map(timestamp),
    })
}

/// Rows are written by the front end. An unreadable `channel_flags` column is
/// treated as empty so the channel-match policy decides for that row.
fn subscription_from_row(row: &SqliteRow) -> Result<Subscription> {
    let endpoint: String = row.try_get("endpoint")?;
    let flags: Option<String> = row.try_get("channel_flags")?;
    let channel_flags = match flags.as_deref().map(serde_json::from_str) {
        None => BTreeMap::new(),
        Some(Ok(flags)) => flags,
        Some(Err(e)) => {
            warn!(endpoint = %endpoint, error = %e, "ignoring malformed channel_flags");
            BTreeMap::new()
        },
    };
    Ok(Subscription {
        endpoint,
        p256dh: row.try_get("p256dh")?,
        auth: row.try_get("auth")?,
        channel_flags,
        is_active: row.try_get("is_active")?,
        user_agent: row.try_get("user_agent")?,
        created_at: timestamp(row.try_get("created_at_ms")?),
    })
}

/// Convert rows, skipping (and logging) those that cannot be read so one bad
/// row never blocks delivery to the rest.
fn readable_subscriptions(rows: &[SqliteRow]) -> impl Iterator<Item = Subscription> + '_ {
    rows.iter().filter_map(|row| match subscription_from_row(row) {
        Ok(sub) => Some(sub),
        Err(e) => {
            let endpoint: String = row.try_get("endpoint").unwrap_or_default();
            warn!(endpoint = %endpoint, error = %e, "skipping unreadable subscription row");
            None
        },
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn upsert_if_absent(&self, msg: &NewMessage) -> Result<UpsertOutcome> {
        let inserted = sqlx::query(
            "INSERT INTO messages (source_message_id, channel_key, channel_title, priority, body, has_media, created_at_ms, notified)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(source_message_id) DO NOTHING",
        )
        .bind(&msg.source_message_id)
        .bind(&msg.channel_key)
        .bind(&msg.channel_title)
        .bind(msg.priority.as_str())
        .bind(&msg.body)
        .bind(msg.has_media)
        .bind(msg.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE source_message_id = ?"
        ))
        .bind(&msg.source_message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            message: message_from_row(&row)?,
            is_new: inserted.rows_affected() == 1,
        })
    }

    async fn mark_notified(&self, source_message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET notified = 1, notified_at_ms = ?
             WHERE source_message_id = ? AND notified = 0",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(source_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn pending_unnotified(&self, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE notified = 0 ORDER BY id ASC LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_message(&self, source_message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE source_message_id = ?"
        ))
        .bind(source_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn count_pending(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE notified = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE created_at_ms >= ?")
                .bind(since.timestamp_millis())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl SubscriberRegistry for SqliteStore {
    async fn list_active(
        &self,
        channel_key: &str,
        policy: ChannelMatch,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE is_active = 1
             ORDER BY created_at_ms ASC, endpoint ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(readable_subscriptions(&rows)
            .filter(|sub| sub.wants(channel_key, policy))
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY created_at_ms ASC, endpoint ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(readable_subscriptions(&rows).collect())
    }

    async fn get_subscription(&self, endpoint: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE endpoint = ?"
        ))
        .bind(endpoint)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn count_active(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn upsert(&self, sub: &Subscription) -> Result<()> {
        let flags = serde_json::to_string(&sub.channel_flags)?;
        sqlx::query(
            "INSERT INTO subscriptions (endpoint, p256dh, auth, channel_flags, is_active, user_agent, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(endpoint) DO UPDATE SET
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                channel_flags = excluded.channel_flags,
                is_active = excluded.is_active,
                user_agent = excluded.user_agent",
        )
        .bind(&sub.endpoint)
        .bind(&sub.p256dh)
        .bind(&sub.auth)
        .bind(&flags)
        .bind(sub.is_active)
        .bind(&sub.user_agent)
        .bind(sub.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, endpoint: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE subscriptions SET is_active = 0 WHERE endpoint = ? AND is_active = 1")
                .bind(endpoint)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, endpoint: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE endpoint = ?")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone};

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:", 5).await.unwrap()
    }

    fn make_message(id: &str) -> NewMessage {
        NewMessage {
            source_message_id: id.into(),
            channel_key: "trades".into(),
            channel_title: "FREE TRADES".into(),
            priority: Priority::High,
            body: format!("post {id}"),
            has_media: false,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = make_store().await;
        let first = store.upsert_if_absent(&make_message("-100:42")).await.unwrap();
        assert!(first.is_new);
        assert!(!first.message.notified);

        let mut changed = make_message("-100:42");
        changed.body = "edited".into();
        let second = store.upsert_if_absent(&changed).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.message.id, first.message.id);
        assert_eq!(second.message.body, "post -100:42");
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_returns_existing_notified_flag() {
        let store = make_store().await;
        store.upsert_if_absent(&make_message("1:1")).await.unwrap();
        assert!(store.mark_notified("1:1").await.unwrap());

        let again = store.upsert_if_absent(&make_message("1:1")).await.unwrap();
        assert!(!again.is_new);
        assert!(again.message.notified);
        assert!(again.message.notified_at.is_some());
    }

    #[tokio::test]
    async fn mark_notified_is_monotonic() {
        let store = make_store().await;
        store.upsert_if_absent(&make_message("1:1")).await.unwrap();

        assert!(store.mark_notified("1:1").await.unwrap());
        assert!(!store.mark_notified("1:1").await.unwrap());
        assert!(!store.mark_notified("missing").await.unwrap());

        // Re-ingesting does not reset the flag.
        store.upsert_if_absent(&make_message("1:1")).await.unwrap();
        assert!(store.get_message("1:1").await.unwrap().unwrap().notified);
    }

    #[tokio::test]
    async fn pending_in_ingestion_order() {
        let store = make_store().await;
        for id in ["1:3", "1:1", "1:2"] {
            store.upsert_if_absent(&make_message(id)).await.unwrap();
        }
        store.mark_notified("1:1").await.unwrap();

        let pending = store.pending_unnotified(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|m| m.source_message_id.as_str()).collect();
        assert_eq!(ids, vec!["1:3", "1:2"]);

        assert_eq!(store.pending_unnotified(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn count_since_filters_by_source_time() {
        let store = make_store().await;
        let mut old = make_message("1:1");
        old.created_at = Utc.timestamp_opt(1_000, 0).unwrap();
        store.upsert_if_absent(&old).await.unwrap();
        store.upsert_if_absent(&make_message("1:2")).await.unwrap();

        let since = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        assert_eq!(store.count_since(since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_active_filters_flags() {
        let store = make_store().await;
        store
            .upsert(
                &Subscription::new("https://push.example/a", "k", "a")
                    .with_channel("trades", true)
                    .with_channel("main", false),
            )
            .await
            .unwrap();
        store
            .upsert(&Subscription::new("https://push.example/b", "k", "a"))
            .await
            .unwrap();

        let trades = store.list_active("trades", ChannelMatch::Strict).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].endpoint, "https://push.example/a");
        assert!(store
            .list_active("main", ChannelMatch::Strict)
            .await
            .unwrap()
            .is_empty());

        let all_main = store
            .list_active("main", ChannelMatch::DefaultAllSubscribed)
            .await
            .unwrap();
        assert_eq!(all_main.len(), 1);
        assert_eq!(all_main[0].endpoint, "https://push.example/b");
    }

    async fn insert_raw_subscription(store: &SqliteStore, endpoint: &str, flags: &str) {
        sqlx::query(
            "INSERT INTO subscriptions (endpoint, p256dh, auth, channel_flags, is_active, created_at_ms)
             VALUES (?, 'k', 'a', ?, 1, 0)",
        )
        .bind(endpoint)
        .bind(flags)
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn malformed_flags_do_not_hide_other_subscribers() {
        let store = make_store().await;
        store
            .upsert(&Subscription::new("https://push.example/good", "k", "a").with_channel("trades", true))
            .await
            .unwrap();
        insert_raw_subscription(&store, "https://push.example/bad", "trades=1").await;

        let strict = store.list_active("trades", ChannelMatch::Strict).await.unwrap();
        let endpoints: Vec<_> = strict.iter().map(|s| s.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["https://push.example/good"]);

        // The broken row reads as "no flags", so the policy decides.
        let lenient = store
            .list_active("trades", ChannelMatch::DefaultAllSubscribed)
            .await
            .unwrap();
        assert_eq!(lenient.len(), 2);

        let bad = store
            .get_subscription("https://push.example/bad")
            .await
            .unwrap()
            .unwrap();
        assert!(bad.channel_flags.is_empty());
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_rows_are_skipped() {
        let store = make_store().await;
        store
            .upsert(&Subscription::new("https://push.example/good", "k", "a").with_channel("trades", true))
            .await
            .unwrap();
        // SQLite accepts a blob in a TEXT column; it cannot be read back as a string.
        sqlx::query(
            "INSERT INTO subscriptions (endpoint, p256dh, auth, channel_flags, is_active, created_at_ms)
             VALUES ('https://push.example/blob', X'FF00FF', 'a', '{}', 1, 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let active = store.list_active("trades", ChannelMatch::Strict).await.unwrap();
        assert_eq!(active.len(), 1);
        let all: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert_eq!(all, vec!["https://push.example/good"]);
    }

    #[tokio::test]
    async fn deactivate_and_delete_are_idempotent() {
        let store = make_store().await;
        let sub = Subscription::new("https://push.example/a", "k", "a").with_channel("trades", true);
        store.upsert(&sub).await.unwrap();
        assert_eq!(store.count_active().await.unwrap(), 1);

        assert!(store.deactivate(&sub.endpoint).await.unwrap());
        assert!(!store.deactivate(&sub.endpoint).await.unwrap());
        assert_eq!(store.count_active().await.unwrap(), 0);
        assert!(store
            .list_active("trades", ChannelMatch::Strict)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.list_all().await.unwrap().len(), 1);

        assert!(store.delete(&sub.endpoint).await.unwrap());
        assert!(!store.delete(&sub.endpoint).await.unwrap());
        assert!(store.get_subscription(&sub.endpoint).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_created_at() {
        let store = make_store().await;
        let mut sub = Subscription::new("https://push.example/a", "k", "a");
        sub.created_at = Utc.timestamp_opt(1_000, 0).unwrap();
        store.upsert(&sub).await.unwrap();

        let mut replaced = Subscription::new("https://push.example/a", "k2", "a2");
        replaced.user_agent = Some("Firefox".into());
        store.upsert(&replaced).await.unwrap();

        let stored = store.get_subscription("https://push.example/a").await.unwrap().unwrap();
        assert_eq!(stored.p256dh, "k2");
        assert_eq!(stored.user_agent.as_deref(), Some("Firefox"));
        assert_eq!(stored.created_at, sub.created_at);
    }

    #[tokio::test]
    async fn file_database_persists_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("beacon.db").display());

        {
            let store = SqliteStore::new(&url, 2).await.unwrap();
            store.upsert_if_absent(&make_message("1:1")).await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::new(&url, 2).await.unwrap();
        assert_eq!(store.pending_unnotified(10).await.unwrap().len(), 1);
    }
}
