use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Grounding domains a session can be pinned to
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Domain {
    /// Plain persona conversation, no knowledge base
    #[default]
    Normal,
    /// Hospital departments, treatments and doctors
    Healthcare,
    /// Finance knowledge base
    Finance,
}

impl Domain {
    /// Whether this domain injects knowledge-base text into the system prompt.
    pub fn is_grounded(self) -> bool {
        !matches!(self, Domain::Normal)
    }

    /// Parse a user-supplied selector, ignoring surrounding whitespace.
    pub fn parse_selector(selector: &str) -> Option<Domain> {
        selector.trim().parse().ok()
    }
}

/// Persona the assistant speaks as
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Persona {
    /// Warm, casual voice assistant
    #[default]
    Voice,
    /// Programming and technology helper
    Technical,
    /// Writing and brainstorming helper
    Creative,
}

/// Role in conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One committed message in a session history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Events delivered to the caller while a turn is streaming.
///
/// Every turn ends with exactly one of `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Incremental model output, forwarded as received
    Chunk(String),
    /// Clean end of stream
    Done,
    /// Terminal failure with a human-readable message
    Error(String),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done | ChatEvent::Error(_))
    }
}

/// Per-turn request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl AskRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Non-streaming success body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub reply: String,
}

/// Failure body for non-streaming responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Wire shape of a single streaming event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEventBody {
    Chunk { chunk: String },
    Done { done: bool },
    Error { error: String },
}

impl From<ChatEvent> for StreamEventBody {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Chunk(chunk) => StreamEventBody::Chunk { chunk },
            ChatEvent::Done => StreamEventBody::Done { done: true },
            ChatEvent::Error(error) => StreamEventBody::Error { error },
        }
    }
}

/// Body returned by the reset operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
}

impl ResetResponse {
    pub fn context_reset() -> Self {
        Self {
            status: "context reset".to_string(),
        }
    }
}
