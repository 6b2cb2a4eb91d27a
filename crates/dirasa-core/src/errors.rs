//! Frame decoding errors.

use thiserror::Error;

/// Why an inbound frame could not be turned into an `InboundMessage`.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The top-level JSON value was not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The `type` field was missing or not a string.
    #[error("frame has no string `type` field")]
    MissingType,
    /// The `payload` field was present but not an object.
    #[error("payload of `{kind}` frame is not an object")]
    PayloadNotObject {
        /// Message kind carried by the frame.
        kind: String,
    },
}

impl FrameError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::PayloadNotObject { .. } => "payload_not_object",
        }
    }
}
