//! Chunk → [`StreamEvent`] decoding.
//!
//! The discriminator table is explicit: every `type` value is matched by hand
//! and payload fields are read through small alias-aware accessors, so a
//! backend that mixes `snake_case` and `camelCase` keys still decodes.

use super::event::{StreamEvent, ToolCall, WebSearchResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Decode one logical chunk into an event.
///
/// Returns `None` for invalid JSON, non-object payloads, a missing `type`, or
/// an unknown discriminator. Never panics.
#[must_use]
pub fn decode(chunk: &str) -> Option<StreamEvent> {
    let value: Value = serde_json::from_str(chunk.trim()).ok()?;
    let Value::Object(obj) = value else {
        return None;
    };
    decode_object(&obj)
}

/// Decode a chunk that may hold several newline-separated JSON objects.
///
/// A chunk that decodes as a whole yields one event. Otherwise each line is
/// tried on its own (stripping `data:` prefixes and skipping `[DONE]`), which
/// covers multi-line `data:` frames carrying one JSON object per line.
#[must_use]
pub fn decode_chunk(chunk: &str) -> SmallVec<[StreamEvent; 1]> {
    let mut out = SmallVec::new();
    if let Some(event) = decode(chunk) {
        out.push(event);
        return out;
    }
    if !chunk.contains('\n') {
        tracing::warn!(chunk = %truncate_for_log(chunk), "skipping undecodable stream chunk");
        return out;
    }
    for line in chunk.lines() {
        let line = line.trim();
        let line = line.strip_prefix("data:").map_or(line, str::trim);
        if line.is_empty() || line.eq_ignore_ascii_case("[DONE]") {
            continue;
        }
        match decode(line) {
            Some(event) => out.push(event),
            None => {
                tracing::warn!(chunk = %truncate_for_log(line), "skipping undecodable stream line");
            }
        }
    }
    out
}

fn truncate_for_log(text: &str) -> &str {
    const MAX_LOG_CHARS: usize = 200;
    match text.char_indices().nth(MAX_LOG_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn decode_object(obj: &Map<String, Value>) -> Option<StreamEvent> {
    let kind = obj.get("type")?.as_str()?;
    let event = match kind {
        "content" => StreamEvent::Content {
            text: text_field(obj),
            output_type: str_field(obj, &["output_type", "outputType"]),
        },
        "text" => StreamEvent::Text {
            text: text_field(obj),
        },
        "reasoning" => StreamEvent::Reasoning {
            text: text_field(obj),
        },
        "tool_call" => StreamEvent::ToolCall(ToolCall {
            id: str_field(obj, &["id"]).unwrap_or_default(),
            name: str_field(obj, &["name"]).unwrap_or_default(),
            arguments: arguments_field(obj),
            is_reasoning_step: field(obj, &["is_reasoning_step", "isReasoningStep"])
                .and_then(Value::as_bool),
        }),
        "web_search_status" => StreamEvent::WebSearchStatus {
            stage: str_field(obj, &["stage"]).unwrap_or_default(),
        },
        "web_search_results" => StreamEvent::WebSearchResults {
            results: search_results_field(obj),
        },
        "error" => StreamEvent::Error {
            message: str_field(obj, &["message"]).unwrap_or_default(),
            upstream_status: status_field(obj),
        },
        "finish" => StreamEvent::Finish {
            reason: str_field(obj, &["reason"]).unwrap_or_default(),
        },
        "stream_end" => StreamEvent::StreamEnd {
            message_id: str_field(obj, &["message_id", "messageId"]),
        },
        "image_generation" => StreamEvent::ImageGeneration {
            image_url: str_field(obj, &["image_url", "imageUrl"]).unwrap_or_default(),
        },
        _ => return None,
    };
    Some(event)
}

// ---------------------------------------------------------------------------
// Field accessors
// ---------------------------------------------------------------------------

#[inline]
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| obj.get(*key).filter(|value| !value.is_null()))
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    field(obj, keys).and_then(Value::as_str).map(str::to_owned)
}

#[inline]
fn text_field(obj: &Map<String, Value>) -> String {
    str_field(obj, &["text"]).unwrap_or_default()
}

fn status_field(obj: &Map<String, Value>) -> Option<u16> {
    match field(obj, &["upstream_status", "upstreamStatus"])? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Arguments may arrive as an object or as a JSON-encoded string.
fn arguments_field(obj: &Map<String, Value>) -> Value {
    match field(obj, &["arguments_obj", "argumentsObj", "arguments"]) {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::String(raw.clone())),
        Some(other) => other.clone(),
        None => Value::Object(Map::new()),
    }
}

#[derive(Deserialize)]
struct RawSearchResult {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "url", alias = "link")]
    href: String,
    #[serde(default, alias = "content")]
    snippet: String,
}

/// Elements that fail to deserialize are dropped; the rest are kept.
fn search_results_field(obj: &Map<String, Value>) -> Vec<WebSearchResult> {
    let Some(Value::Array(items)) = field(obj, &["results"]) else {
        return Vec::new();
    };
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let Ok(raw) = RawSearchResult::deserialize(item) else {
            continue;
        };
        let position = u32::try_from(results.len()).unwrap_or(u32::MAX);
        results.push(WebSearchResult {
            index: raw.index.unwrap_or(position),
            title: raw.title,
            href: raw.href,
            snippet: raw.snippet,
        });
    }
    results
}
