use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] beacon_config::Error),

    #[error(transparent)]
    Store(#[from] beacon_store::Error),

    #[error(transparent)]
    Dispatch(#[from] beacon_dispatch::Error),

    #[error(transparent)]
    Push(#[from] beacon_push::Error),

    #[error(transparent)]
    Telegram(#[from] beacon_telegram::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
