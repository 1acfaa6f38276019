use serde::Serialize;
use serde_json::Value;

/// One tool invocation reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_reasoning_step: Option<bool>,
}

/// One web-search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebSearchResult {
    pub index: u32,
    pub title: String,
    pub href: String,
    pub snippet: String,
}

/// A decoded streaming event.
///
/// Each variant corresponds to one value of the wire `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StreamEvent {
    Content {
        text: String,
        output_type: Option<String>,
    },
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall(ToolCall),
    WebSearchStatus {
        stage: String,
    },
    WebSearchResults {
        results: Vec<WebSearchResult>,
    },
    Error {
        message: String,
        upstream_status: Option<u16>,
    },
    Finish {
        reason: String,
    },
    StreamEnd {
        message_id: Option<String>,
    },
    ImageGeneration {
        image_url: String,
    },
}

impl StreamEvent {
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::Text { text: text.into() }
    }

    #[inline]
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        StreamEvent::Content {
            text: text.into(),
            output_type: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        StreamEvent::Reasoning { text: text.into() }
    }

    #[inline]
    #[must_use]
    pub fn finish(reason: impl Into<String>) -> Self {
        StreamEvent::Finish {
            reason: reason.into(),
        }
    }

    /// The wire discriminator this event was decoded from.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => "content",
            StreamEvent::Text { .. } => "text",
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::ToolCall(_) => "tool_call",
            StreamEvent::WebSearchStatus { .. } => "web_search_status",
            StreamEvent::WebSearchResults { .. } => "web_search_results",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Finish { .. } => "finish",
            StreamEvent::StreamEnd { .. } => "stream_end",
            StreamEvent::ImageGeneration { .. } => "image_generation",
        }
    }

    /// Whether this event ends the message it belongs to.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Finish { .. } | StreamEvent::StreamEnd { .. }
        )
    }
}
