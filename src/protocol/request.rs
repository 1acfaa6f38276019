use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

/// Body of the `chat_request_json` multipart part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub provider: String,
    pub channel: String,
    pub api_address: String,
    pub api_key: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_web_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model_parameters: Option<Value>,
}

/// Binary or inline payload sent alongside a chat request.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Sent as an `uploaded_documents` file part.
    Document {
        file_name: String,
        mime_type: String,
        bytes: Bytes,
    },
    /// Sent as the `inline_data_content` JSON part, e.g. recorded audio.
    InlineData {
        mime_type: String,
        data_base64: String,
    },
}

/// Wire form of [`Attachment::InlineData`].
#[derive(Debug, Serialize)]
pub(crate) struct InlineDataContent<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

// ---------------------------------------------------------------------------
// Image generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(rename = "apiAddress")]
    pub api_address: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTimings {
    #[serde(default)]
    pub inference: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    #[serde(default)]
    pub images: Vec<GeneratedImage>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub timings: Option<ImageTimings>,
    #[serde(default)]
    pub seed: Option<i64>,
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelsWire {
    Wrapped { data: Vec<ModelEntry> },
    Bare(Vec<ModelEntry>),
}

/// Parse a models listing in either `{data:[{id}]}` or bare `[{id}]` form.
///
/// # Errors
///
/// Returns the serde error when the body matches neither shape.
pub fn parse_models_response(body: &[u8]) -> Result<Vec<String>, serde_json::Error> {
    let wire: ModelsWire = serde_json::from_slice(body)?;
    let entries = match wire {
        ModelsWire::Wrapped { data } => data,
        ModelsWire::Bare(entries) => entries,
    };
    Ok(entries.into_iter().map(|entry| entry.id).collect())
}

// ---------------------------------------------------------------------------
// Releases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// A GitHub-release-shaped description of the latest published build.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseInfo {
    /// Tag without a leading `v`.
    #[must_use]
    pub fn version(&self) -> &str {
        self.tag_name
            .strip_prefix('v')
            .or_else(|| self.tag_name.strip_prefix('V'))
            .unwrap_or(&self.tag_name)
    }
}
