use thiserror::Error;

/// Errors raised by the bridge.
///
/// Only `Config` is fatal (at startup). Everything else is logged where it
/// happens and the governing loop carries on.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid {field} value: {value:?}")]
    InvalidParam { field: &'static str, value: String },

    #[error("unknown command topic: {0}")]
    UnknownTopic(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidParam {
            field,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
