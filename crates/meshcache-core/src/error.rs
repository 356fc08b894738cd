use thiserror::Error;

/// Errors raised while encoding or decoding coordination data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown coordination channel: {0}")]
    UnknownChannel(String),

    #[error("Malformed event on {channel}: {message}")]
    MalformedEvent { channel: String, message: String },
}

impl CoreError {
    pub fn unknown_channel(channel: impl Into<String>) -> Self {
        Self::UnknownChannel(channel.into())
    }

    pub fn malformed_event(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedEvent {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
