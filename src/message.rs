//! Conversation message types
//!
//! A [`Message`] is one role-tagged unit of conversation content. Messages
//! are immutable once appended to a session, with one exception: the memory
//! optimizer may replace a contiguous prefix of a session with a synthetic
//! summary message and may rewrite message content during its trim stages.

use crate::error::MnemoError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a message sender
///
/// Unknown role strings are rejected at parse time with
/// [`MnemoError::InvalidRole`]; once a value of this type exists it is
/// guaranteed to be one of the four supported roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions and synthetic compaction summaries
    System,
    /// Analyst input
    User,
    /// Model output
    Assistant,
    /// Tool results fed back into the conversation
    Tool,
}

impl Role {
    /// Returns the lowercase wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// True for model-authored messages, which are priced as output tokens
    pub fn is_model_output(&self) -> bool {
        matches!(self, Role::Assistant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MnemoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(MnemoError::InvalidRole(other.to_string())),
        }
    }
}

/// Per-message metadata
///
/// A restricted, explicitly-optional field set rather than a free-form map,
/// so every recorded fact has a type and a name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Token count came from the length estimator, not a real tokenizer
    #[serde(default)]
    pub approximate: bool,

    /// Model that produced this message, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// For synthetic summaries: how many messages were collapsed into this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_from: Option<usize>,
}

/// Single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Token count of the content (exact or estimated, see metadata)
    pub token_count: usize,
    /// Structured metadata
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Creates a new message stamped with the current time
    ///
    /// # Examples
    ///
    /// ```
    /// use mnemo::message::{Message, Role};
    ///
    /// let msg = Message::new(Role::User, "describe the incident", 5);
    /// assert_eq!(msg.role, Role::User);
    /// assert_eq!(msg.token_count, 5);
    /// ```
    pub fn new(role: Role, content: impl Into<String>, token_count: usize) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            token_count,
            metadata: MessageMetadata::default(),
        }
    }

    /// Creates a message whose token count came from the estimator
    pub fn approximate(role: Role, content: impl Into<String>, token_count: usize) -> Self {
        let mut message = Self::new(role, content, token_count);
        message.metadata.approximate = true;
        message
    }
}
