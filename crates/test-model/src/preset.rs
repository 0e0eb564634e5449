use copilot_model::{ErrorKind, ToolCallRequest};
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

/// The preset response for one model request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the response fails with this kind of error after streaming
    /// `events`. Without events, the request itself fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PresetError>,
}

/// Error kinds that a preset response can fail with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetError {
    Moderated,
    RateLimitExceeded,
    Unauthorized,
    Other,
}

impl From<PresetError> for ErrorKind {
    fn from(value: PresetError) -> Self {
        match value {
            PresetError::Moderated => ErrorKind::Moderated,
            PresetError::RateLimitExceeded => ErrorKind::RateLimitExceeded,
            PresetError::Unauthorized => ErrorKind::Unauthorized,
            PresetError::Other => ErrorKind::Other,
        }
    }
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            error: None,
        }
    }

    /// Creates a `PresetResponse` that only says `text`.
    #[inline]
    pub fn with_text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Creates a `PresetResponse` that fails with the given error.
    #[inline]
    pub fn with_error(error: PresetError) -> Self {
        Self {
            events: vec![],
            error: Some(error),
        }
    }

    /// Creates a `PresetResponse` that streams `events`, then fails with
    /// the given error.
    #[inline]
    pub fn interrupted(
        events: impl Into<Vec<PresetEvent>>,
        error: PresetError,
    ) -> Self {
        Self {
            events: events.into(),
            error: Some(error),
        }
    }

    pub(crate) fn has_tool_call(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)))
    }
}
