//! Channel post → candidate message.

use std::sync::Arc;

use {
    beacon_config::{BeaconConfig, Priority},
    beacon_store::NewMessage,
    chrono::{DateTime, Utc},
};

use crate::types::{ChannelPost, Update};

/// Body used for posts that carry media but no text.
pub const MEDIA_ONLY_BODY: &str = "📷 Media post";

/// Title used when an unconfigured chat has no title either.
const FALLBACK_TITLE: &str = "Channel";

/// Resolves posts against the configured channel routes.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: Arc<BeaconConfig>,
}

impl Normalizer {
    pub fn new(config: Arc<BeaconConfig>) -> Self {
        Self { config }
    }

    /// Normalize an update. `None` for non-post updates and posts with
    /// neither text nor media.
    pub fn normalize_update(&self, update: &Update) -> Option<NewMessage> {
        self.normalize_post(update.post()?)
    }

    pub fn normalize_post(&self, post: &ChannelPost) -> Option<NewMessage> {
        let has_media = post.has_media();
        let body = match post.text_or_caption() {
            Some(text) => text.to_string(),
            None if has_media => MEDIA_ONLY_BODY.to_string(),
            None => return None,
        };

        let chat = &post.chat;
        let (channel_key, channel_title, priority) =
            match self.config.route_for(chat.username.as_deref(), chat.id) {
                Some(route) => (
                    route.channel_key.clone(),
                    route.display_name.clone(),
                    route.priority,
                ),
                None => (
                    self.config.notification.default_channel.clone(),
                    chat.title
                        .clone()
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| FALLBACK_TITLE.to_string()),
                    Priority::High,
                ),
            };

        let created_at = if post.date > 0 {
            DateTime::from_timestamp(post.date, 0).unwrap_or_else(Utc::now)
        } else {
            Utc::now()
        };

        Some(NewMessage {
            source_message_id: format!("{}:{}", chat.id, post.message_id),
            channel_key,
            channel_title,
            priority,
            body,
            has_media,
            created_at,
        })
    }
}
