use crate::config::Config;
use crate::extract::OutputKind;
use crate::input::{ConversationTurn, ParsedInput, Role};
use crate::upstream::{Operation, Payload, RelayRequest};
use serde::Serialize;

const CHATBOT_SYSTEM_PROMPT: &str =
    "You are a helpful, friendly AI assistant. Answer clearly and concisely.";

const TEXT_GENERATOR_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
     This is a continuous conversation. \
     You must remember and use information the user provides earlier.";

const SUMMARIZER_INSTRUCTION: &str = "Summarize the following text clearly and concisely:\n\n";

/// Endpoint categories served by the relay. Each has its own limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Chatbot,
    Summarizer,
    TextGenerator,
    ImageGenerator,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Chatbot,
        Endpoint::Summarizer,
        Endpoint::TextGenerator,
        Endpoint::ImageGenerator,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Chatbot => "chatbot",
            Endpoint::Summarizer => "summarizer",
            Endpoint::TextGenerator => "text-generator",
            Endpoint::ImageGenerator => "image-generator",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Chatbot => "/api/chatbot",
            Endpoint::Summarizer => "/api/summarizer",
            Endpoint::TextGenerator => "/api/text-generator",
            Endpoint::ImageGenerator => "/api/image-generator",
        }
    }

    pub fn output_kind(self) -> OutputKind {
        match self {
            Endpoint::ImageGenerator => OutputKind::Image,
            _ => OutputKind::Text,
        }
    }

    fn streams_by_default(self) -> bool {
        matches!(self, Endpoint::Chatbot)
    }

    fn system_prompt(self) -> Option<&'static str> {
        match self {
            Endpoint::Chatbot => Some(CHATBOT_SYSTEM_PROMPT),
            Endpoint::TextGenerator => Some(TEXT_GENERATOR_SYSTEM_PROMPT),
            Endpoint::Summarizer | Endpoint::ImageGenerator => None,
        }
    }

    /// Build the upstream request for a normalized client input.
    pub fn build_request(self, parsed: ParsedInput, config: &Config) -> RelayRequest {
        let stream = match self {
            Endpoint::ImageGenerator => false,
            _ => parsed.stream.unwrap_or_else(|| self.streams_by_default()),
        };

        let (operation, payload) = match self {
            Endpoint::Chatbot | Endpoint::TextGenerator => {
                let mut turns = Vec::with_capacity(1);
                if let Some(system) = self.system_prompt() {
                    turns.push(ConversationTurn::new(Role::System, system));
                }
                turns.extend(parsed.input.into_turns());
                (Operation::ChatCompletions, Payload::Messages(turns))
            }
            Endpoint::Summarizer => (
                Operation::Responses,
                Payload::Prompt(format!("{}{}", SUMMARIZER_INSTRUCTION, parsed.input.into_text())),
            ),
            Endpoint::ImageGenerator => (
                Operation::ImageGenerations {
                    size: config.image_size.clone(),
                },
                Payload::Prompt(parsed.input.into_text()),
            ),
        };

        RelayRequest {
            operation,
            model: config.model(self).to_string(),
            payload,
            stream,
        }
    }
}
