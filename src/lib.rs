//! Mnemo - conversation memory and cost optimization for LLM analysis apps
//!
//! This library manages multi-turn analysis conversations for an
//! LLM-assisted incident-analysis application: it stores sessions, windows
//! their history to a token budget for upstream calls, compacts sessions
//! that outgrow their ceiling, memoizes deterministic analysis results,
//! and prices token usage per session.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `memory`: the [`MemoryManager`] entry point, session index, history
//!   windowing, compaction pipeline, analysis cache, pricing, and usage
//!   analytics
//! - `storage`: SQLite persistence for sessions, messages, and cache entries
//! - `message`: role-tagged conversation messages and their metadata
//! - `tokenizer`: pluggable token counting with an estimator fallback
//! - `config`: configuration loading and validation
//! - `error`: error types and result aliases
//!
//! The upstream language-model client, the prompt text, and the reporting
//! layer are external collaborators: they consume histories and cache
//! lookups from here and feed responses back through `add_message`.
//!
//! # Example
//!
//! ```
//! use mnemo::config::MemoryConfig;
//! use mnemo::memory::{MemoryManager, SessionMetadata};
//! use mnemo::message::Role;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = MemoryConfig::default();
//!     config.storage.ephemeral = true;
//!     let manager = MemoryManager::new(config)?;
//!
//!     let id = manager.create_session("incident_analysis", None, SessionMetadata::default());
//!     manager.add_message(&id, Role::User, "describe the incident", None);
//!
//!     let history = manager.get_history(&id, 1_000);
//!     assert_eq!(history.len(), 1);
//!
//!     manager.flush();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod storage;
pub mod tokenizer;

// Re-export commonly used types
pub use config::MemoryConfig;
pub use error::{MnemoError, Result};
pub use memory::{Append, AppendReceipt, CacheLookup, MemoryManager, SessionMetadata};
pub use message::{Message, Role};
pub use tokenizer::{estimate_tokens, Tokenizer};
