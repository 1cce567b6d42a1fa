//! Client body normalization.
//!
//! Bodies arrive as JSON, form-encoded pairs, or bare text depending on the
//! caller. Everything is reduced to either a single trimmed prompt or an
//! ordered, bounded conversation.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Recognized roles, with the legacy "ai" alias folded onto assistant.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    Prompt(String),
    Conversation(Vec<ConversationTurn>),
}

impl ClientInput {
    /// Conversation view; a flat prompt becomes a single user turn.
    pub fn into_turns(self) -> Vec<ConversationTurn> {
        match self {
            ClientInput::Prompt(text) => vec![ConversationTurn::new(Role::User, text)],
            ClientInput::Conversation(turns) => turns,
        }
    }

    /// Flat view; turn contents are joined by a blank line.
    pub fn into_text(self) -> String {
        match self {
            ClientInput::Prompt(text) => text,
            ClientInput::Conversation(turns) => turns
                .into_iter()
                .map(|turn| turn.content)
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    pub input: ClientInput,
    /// Explicit `stream` flag from the caller, if any.
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyEncoding {
    Json,
    Form,
    Raw,
}

impl BodyEncoding {
    fn detect(content_type: Option<&str>, body: &str) -> Self {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime == "application/json" || mime.ends_with("+json") {
            return BodyEncoding::Json;
        }
        if mime == "application/x-www-form-urlencoded" {
            return BodyEncoding::Form;
        }

        if body.starts_with('{') || body.starts_with('[') || body.starts_with('"') {
            BodyEncoding::Json
        } else if PROMPT_FIELDS
            .iter()
            .any(|field| body.starts_with(&format!("{}=", field)) || body.contains(&format!("&{}=", field)))
        {
            BodyEncoding::Form
        } else {
            BodyEncoding::Raw
        }
    }
}

/// Single-string fields, in precedence order.
const PROMPT_FIELDS: [&str; 2] = ["input", "prompt"];

/// Reduce a raw request body to a prompt or a bounded conversation.
pub fn normalize(
    content_type: Option<&str>,
    body: &[u8],
    max_turns: usize,
) -> Result<ParsedInput, RelayError> {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RelayError::MissingInput);
    }

    match BodyEncoding::detect(content_type, trimmed) {
        BodyEncoding::Json => {
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| RelayError::InvalidJson(e.to_string()))?;
            from_json(&value, max_turns, true)
        }
        BodyEncoding::Form => from_form(trimmed),
        BodyEncoding::Raw => Ok(ParsedInput {
            input: ClientInput::Prompt(trimmed.to_string()),
            stream: None,
        }),
    }
}

fn from_json(value: &Value, max_turns: usize, unwrap_string: bool) -> Result<ParsedInput, RelayError> {
    match value {
        Value::Object(map) => from_object(map, max_turns),
        Value::Array(items) => conversation(items, max_turns, None),
        Value::String(inner) => {
            // Some platforms hand over a JSON document that was encoded twice.
            let inner_trimmed = inner.trim();
            if unwrap_string && inner_trimmed.starts_with('{') {
                if let Ok(nested) = serde_json::from_str::<Value>(inner_trimmed) {
                    return from_json(&nested, max_turns, false);
                }
            }
            non_empty(inner)
                .map(|prompt| ParsedInput {
                    input: ClientInput::Prompt(prompt),
                    stream: None,
                })
                .ok_or(RelayError::MissingInput)
        }
        _ => Err(RelayError::MissingInput),
    }
}

fn from_object(map: &Map<String, Value>, max_turns: usize) -> Result<ParsedInput, RelayError> {
    let stream = map.get("stream").and_then(Value::as_bool);

    for field in PROMPT_FIELDS {
        if let Some(prompt) = map.get(field).and_then(Value::as_str).and_then(non_empty) {
            return Ok(ParsedInput {
                input: ClientInput::Prompt(prompt),
                stream,
            });
        }
    }

    match map.get("messages") {
        Some(Value::Array(items)) => conversation(items, max_turns, stream),
        _ => Err(RelayError::MissingInput),
    }
}

fn from_form(body: &str) -> Result<ParsedInput, RelayError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(body).map_err(|_| RelayError::MissingInput)?;

    let stream = pairs
        .iter()
        .find(|(key, _)| key == "stream")
        .and_then(|(_, value)| value.parse::<bool>().ok());

    PROMPT_FIELDS
        .iter()
        .find_map(|field| {
            pairs
                .iter()
                .find(|(key, _)| key == field)
                .and_then(|(_, value)| non_empty(value))
        })
        .map(|prompt| ParsedInput {
            input: ClientInput::Prompt(prompt),
            stream,
        })
        .ok_or(RelayError::MissingInput)
}

fn conversation(
    items: &[Value],
    max_turns: usize,
    stream: Option<bool>,
) -> Result<ParsedInput, RelayError> {
    let mut turns: Vec<ConversationTurn> = items.iter().filter_map(parse_turn).collect();
    if turns.is_empty() {
        return Err(RelayError::MissingInput);
    }

    if turns.len() > max_turns {
        turns.drain(..turns.len() - max_turns);
    }

    Ok(ParsedInput {
        input: ClientInput::Conversation(turns),
        stream,
    })
}

fn parse_turn(item: &Value) -> Option<ConversationTurn> {
    let role = item.get("role").and_then(Value::as_str).and_then(Role::parse)?;
    let content = item.get("content").and_then(Value::as_str)?;
    if content.trim().is_empty() {
        return None;
    }
    Some(ConversationTurn::new(role, content))
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
