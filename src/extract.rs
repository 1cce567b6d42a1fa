//! Upstream response-shape parsers.
//!
//! The provider has answered in several incompatible JSON layouts over
//! time. Each known layout is a typed shape; shapes are tried in a fixed
//! order and each either yields content or reports "not this shape".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the caller expects back from the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"output_text": "..."}`
    OutputText,
    /// `{"choices": [{"message": {"content": "..."}}]}`
    ChatCompletion,
    /// `{"output": [{"content": [{"type": "output_text", "text": "..."}]}]}`
    OutputBlocks,
    /// `{"data": [{"url": "..."}]}` or `{"data": [{"b64_json": "..."}]}`
    ImageData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub shape: ResponseShape,
    pub content: String,
}

#[derive(Deserialize)]
struct FlatText {
    output_text: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OutputBlocks {
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<Vec<ContentBlock>>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    image_url: Option<Value>,
}

#[derive(Deserialize)]
struct ImageData {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

fn png_data_uri(b64: &str) -> String {
    format!("data:image/png;base64,{}", b64)
}

impl ResponseShape {
    pub const ORDER: [ResponseShape; 4] = [
        ResponseShape::OutputText,
        ResponseShape::ChatCompletion,
        ResponseShape::OutputBlocks,
        ResponseShape::ImageData,
    ];

    fn parse(self, payload: &Value, kind: OutputKind) -> Option<String> {
        match (self, kind) {
            (ResponseShape::OutputText, OutputKind::Text) => {
                FlatText::deserialize(payload).ok().map(|flat| flat.output_text)
            }
            (ResponseShape::ChatCompletion, OutputKind::Text) => ChatCompletion::deserialize(payload)
                .ok()?
                .choices
                .into_iter()
                .next()?
                .message
                .content,
            (ResponseShape::OutputBlocks, kind) => {
                let blocks = OutputBlocks::deserialize(payload).ok()?;
                blocks.output.iter().find_map(|item| item.select(kind))
            }
            (ResponseShape::ImageData, OutputKind::Image) => {
                let datum = ImageData::deserialize(payload).ok()?.data.into_iter().next()?;
                datum
                    .url
                    .filter(|url| !url.is_empty())
                    .or_else(|| datum.b64_json.map(|b64| png_data_uri(&b64)))
            }
            _ => None,
        }
    }
}

impl OutputItem {
    fn select(&self, kind: OutputKind) -> Option<String> {
        if kind == OutputKind::Image && self.kind.as_deref() == Some("image_generation_call") {
            if let Some(b64) = self.result.as_ref().and_then(Value::as_str) {
                return Some(png_data_uri(b64));
            }
        }

        self.content
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find_map(|block| block.select(kind))
    }
}

impl ContentBlock {
    fn select(&self, kind: OutputKind) -> Option<String> {
        let declared = self.kind.as_deref()?;
        match kind {
            OutputKind::Text if matches!(declared, "output_text" | "text") => {
                self.text.as_ref().and_then(text_value)
            }
            OutputKind::Image if matches!(declared, "output_image" | "image" | "image_url") => {
                self.image_url.as_ref().and_then(text_value)
            }
            _ => None,
        }
    }
}

/// Plain strings, or `{"value": "..."}` / `{"url": "..."}` wrappers.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Find the first non-empty content of the expected kind.
pub fn extract(payload: &Value, kind: OutputKind) -> Option<Extracted> {
    ResponseShape::ORDER.into_iter().find_map(|shape| {
        shape
            .parse(payload, kind)
            .filter(|content| !content.trim().is_empty())
            .map(|content| Extracted { shape, content })
    })
}
