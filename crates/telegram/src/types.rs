//! The subset of Bot API objects needed for channel posts.
//!
//! Unknown fields are ignored; media objects are kept as raw JSON since only
//! their presence matters.

use serde::Deserialize;

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub channel_post: Option<ChannelPost>,
    #[serde(default)]
    pub edited_channel_post: Option<ChannelPost>,
}

impl Update {
    /// The post carried by this update, original or edited.
    pub fn post(&self) -> Option<&ChannelPost> {
        self.channel_post
            .as_ref()
            .or(self.edited_channel_post.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPost {
    pub message_id: i64,
    pub chat: Chat,
    /// Unix seconds.
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub video: Option<serde_json::Value>,
    #[serde(default)]
    pub document: Option<serde_json::Value>,
    #[serde(default)]
    pub animation: Option<serde_json::Value>,
}

impl ChannelPost {
    pub fn has_media(&self) -> bool {
        self.photo.as_ref().is_some_and(|p| !p.is_empty())
            || self.video.is_some()
            || self.document.is_some()
            || self.animation.is_some()
    }

    /// `text`, else `caption`, ignoring empty strings.
    pub fn text_or_caption(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.caption.as_deref().filter(|c| !c.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Result of `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}
