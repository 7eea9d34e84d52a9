use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid VAPID key: {message}")]
    InvalidKey { message: String },

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    WebPush(#[from] web_push::WebPushError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
