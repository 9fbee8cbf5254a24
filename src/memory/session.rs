//! Conversation sessions
//!
//! A session is a bounded, identified sequence of conversational turns for
//! one analysis task. `total_tokens` is maintained incrementally and always
//! equals the sum of the current messages' token counts.

use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Per-session metadata
///
/// A restricted, explicitly-optional field set rather than a free-form map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Analyst or operator who opened the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst: Option<String>,

    /// Where the analyzed material came from (upload, form, import)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Free-form labels for later retrieval
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Complete conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (`{session_type}_{ULID}`)
    pub session_id: String,
    /// Kind of analysis conversation ("incident_analysis", "causal", ...)
    pub session_type: String,
    /// Identifier of the incident or record under analysis, if any
    pub subject_id: Option<String>,
    /// Ordered conversation messages
    pub messages: Vec<Message>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated
    pub last_updated: DateTime<Utc>,
    /// Sum of message token counts, maintained incrementally
    pub total_tokens: usize,
    /// Last computed conversation cost in USD
    pub total_cost: f64,
    /// Structured metadata
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    /// Creates an empty session with a fresh identifier
    pub fn new(
        session_type: impl Into<String>,
        subject_id: Option<String>,
        metadata: SessionMetadata,
    ) -> Self {
        let session_type = session_type.into();
        let now = Utc::now();
        Self {
            session_id: new_session_id(&session_type),
            session_type,
            subject_id,
            messages: Vec::new(),
            created_at: now,
            last_updated: now,
            total_tokens: 0,
            total_cost: 0.0,
            metadata,
        }
    }

    /// Appends a message, updating `total_tokens` and `last_updated`
    pub fn push_message(&mut self, message: Message) {
        self.total_tokens += message.token_count;
        self.last_updated = Utc::now();
        self.messages.push(message);
    }

    /// Recomputes `total_tokens` from the current messages
    ///
    /// Used after the optimizer rewrites message contents.
    pub fn recount_tokens(&mut self) {
        self.total_tokens = self.messages.iter().map(|m| m.token_count).sum();
    }

    /// Snapshot of the session's headline numbers
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            session_type: self.session_type.clone(),
            subject_id: self.subject_id.clone(),
            message_count: self.messages.len(),
            total_tokens: self.total_tokens,
            total_cost: self.total_cost,
            created_at: self.created_at,
            last_updated: self.last_updated,
            duration_seconds: (self.last_updated - self.created_at).num_milliseconds() as f64
                / 1000.0,
        }
    }
}

/// Session statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier
    pub session_id: String,
    /// Kind of analysis conversation
    pub session_type: String,
    /// Subject under analysis, if any
    pub subject_id: Option<String>,
    /// Number of messages currently held
    pub message_count: usize,
    /// Sum of message token counts
    pub total_tokens: usize,
    /// Last computed conversation cost in USD
    pub total_cost: f64,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated
    pub last_updated: DateTime<Utc>,
    /// Seconds between creation and the last mutation
    pub duration_seconds: f64,
}

/// Generates a collision-resistant session identifier
///
/// ULIDs carry a millisecond time component plus a random suffix, so ids
/// sort by creation time and remain unique under concurrent creation.
///
/// # Examples
///
/// ```
/// use mnemo::memory::new_session_id;
///
/// let id = new_session_id("incident_analysis");
/// assert!(id.starts_with("incident_analysis_"));
/// ```
pub fn new_session_id(session_type: &str) -> String {
    format!("{}_{}", session_type, Ulid::new())
}
