//! In-memory store for tests and dry runs.

use std::{collections::BTreeMap, sync::Mutex};

use {
    async_trait::async_trait,
    beacon_config::ChannelMatch,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    store::{MessageStore, SubscriberRegistry},
    types::{Message, NewMessage, Subscription, UpsertOutcome},
};

/// Both relations behind mutexes. Nothing is persisted.
pub struct InMemoryStore {
    messages: Mutex<Vec<Message>>,
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn upsert_if_absent(&self, msg: &NewMessage) -> Result<UpsertOutcome> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = messages
            .iter()
            .find(|m| m.source_message_id == msg.source_message_id)
        {
            return Ok(UpsertOutcome {
                message: existing.clone(),
                is_new: false,
            });
        }

        let id = messages.last().map_or(1, |m| m.id + 1);
        let message = Message {
            id,
            source_message_id: msg.source_message_id.clone(),
            channel_key: msg.channel_key.clone(),
            channel_title: msg.channel_title.clone(),
            priority: msg.priority,
            body: msg.body.clone(),
            has_media: msg.has_media,
            created_at: msg.created_at,
            notified: false,
            notified_at: None,
        };
        messages.push(message.clone());
        Ok(UpsertOutcome {
            message,
            is_new: true,
        })
    }

    async fn mark_notified(&self, source_message_id: &str) -> Result<bool> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        match messages
            .iter_mut()
            .find(|m| m.source_message_id == source_message_id && !m.notified)
        {
            Some(message) => {
                message.notified = true;
                message.notified_at = Some(Utc::now());
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn pending_unnotified(&self, limit: usize) -> Result<Vec<Message>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages
            .iter()
            .filter(|m| !m.notified)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_message(&self, source_message_id: &str) -> Result<Option<Message>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages
            .iter()
            .find(|m| m.source_message_id == source_message_id)
            .cloned())
    }

    async fn count_pending(&self) -> Result<u64> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages.iter().filter(|m| !m.notified).count() as u64)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages.iter().filter(|m| m.created_at >= since).count() as u64)
    }
}

#[async_trait]
impl SubscriberRegistry for InMemoryStore {
    async fn list_active(
        &self,
        channel_key: &str,
        policy: ChannelMatch,
    ) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| s.wants(channel_key, policy))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs.values().cloned().collect())
    }

    async fn get_subscription(&self, endpoint: &str) -> Result<Option<Subscription>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs.get(endpoint).cloned())
    }

    async fn count_active(&self) -> Result<u64> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs.values().filter(|s| s.is_active).count() as u64)
    }

    async fn upsert(&self, sub: &Subscription) -> Result<()> {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = sub.clone();
        if let Some(existing) = subs.get(&sub.endpoint) {
            stored.created_at = existing.created_at;
        }
        subs.insert(sub.endpoint.clone(), stored);
        Ok(())
    }

    async fn deactivate(&self, endpoint: &str) -> Result<bool> {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        match subs.get_mut(endpoint) {
            Some(sub) if sub.is_active => {
                sub.is_active = false;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn delete(&self, endpoint: &str) -> Result<bool> {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs.remove(endpoint).is_some())
    }
}
