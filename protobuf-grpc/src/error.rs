//! Error types for unary calls.

/// Why a unary call produced no result.
///
/// `Display` yields the human-readable detail; [`tag()`](CallError::tag)
/// yields the stable classification used in logs and metrics labels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The channel is invalid, the handle is unknown or idle, or the call
    /// was driven out of order (get before send, get twice).
    #[error("{0}")]
    BadChannelUsage(String),

    /// The response was empty, compressed, an HTML page, or had a frame
    /// length that does not match the body.
    #[error("{0}")]
    InvalidResponse(String),

    /// The transfer itself failed with a libcurl error code.
    #[error("{message}")]
    Transport { errno: i32, message: String },

    /// The response framed correctly but a protobuf field failed to decode.
    #[error("{0}")]
    Decode(String),
}

impl CallError {
    /// Classification string: `bad_channel_usage`, `invalid_response`,
    /// `curl_errno_N` or `decode_error`.
    pub fn tag(&self) -> String {
        match self {
            Self::BadChannelUsage(_) => "bad_channel_usage".to_string(),
            Self::InvalidResponse(_) => "invalid_response".to_string(),
            Self::Transport { errno, .. } => format!("curl_errno_{errno}"),
            Self::Decode(_) => "decode_error".to_string(),
        }
    }
}
