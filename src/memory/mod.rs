//! Conversation memory management
//!
//! The [`MemoryManager`] is the entry point of the library: it owns the
//! session index, the analysis cache, the compaction pipeline, and the
//! pricing table, and wires them to persistent storage. One manager is
//! constructed explicitly at application start and its handle passed to
//! every consumer; there is no global instance.
//!
//! Expected degraded conditions are reported through values, not errors:
//! an unknown session yields [`Append::SessionNotFound`] or `None`, a cache
//! lookup that cannot be answered yields [`CacheLookup::Miss`], and a
//! failing persistence layer downgrades the manager to memory-only
//! operation with a logged warning. Every [`AppendReceipt`] says whether
//! the write actually reached disk.

pub mod cache;
pub mod history;
pub mod optimizer;
pub mod pricing;
pub mod session;
pub mod usage;

pub use cache::{cache_key, AnalysisCache, CacheEntry, CacheLookup};
pub use history::window_history;
pub use optimizer::MemoryOptimizer;
pub use pricing::{conversation_cost, split_tokens, ModelPricing, PricingTable};
pub use session::{new_session_id, Session, SessionMetadata, SessionStats};
pub use usage::{suggestions_for, Priority, Suggestion, UsageStats};

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::message::{Message, Role};
use crate::storage::SqliteStorage;
use crate::tokenizer::{TokenCounter, Tokenizer};
use chrono::{Duration, Utc};
use metrics::increment_counter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Outcome of an `add_message` call
#[derive(Debug, Clone, PartialEq)]
pub enum Append {
    /// The message was appended; the receipt describes how
    Appended(AppendReceipt),
    /// No session with the given id is live
    SessionNotFound,
}

impl Append {
    /// True when the message was appended
    pub fn is_appended(&self) -> bool {
        matches!(self, Append::Appended(_))
    }
}

/// What happened to an appended message
#[derive(Debug, Clone, PartialEq)]
pub struct AppendReceipt {
    /// Tokens charged against the session for this message
    pub token_count: usize,
    /// The count came from the length estimator, not an exact tokenizer
    pub approximate: bool,
    /// Every storage write for this call reached disk
    pub persisted: bool,
    /// The append pushed the session over its ceiling and compaction ran
    pub compacted: bool,
}

/// Conversation memory and cost-optimization manager
///
/// Thread-safe. Mutation of a given session is serialized through a
/// per-session lock; unrelated sessions, cache lookups, and stats reads
/// proceed concurrently. The session index lock is held only to insert,
/// remove, or look up a session handle, never for per-message work.
pub struct MemoryManager {
    config: MemoryConfig,
    storage: Option<SqliteStorage>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    cache: AnalysisCache,
    counter: TokenCounter,
    optimizer: MemoryOptimizer,
    pricing: PricingTable,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl MemoryManager {
    /// Creates a manager from configuration
    ///
    /// Fails only on invalid configuration. An unavailable persistence
    /// layer is not an error: the manager logs the degradation and runs
    /// memory-only, which every receipt and lookup makes observable.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        config.validate()?;

        let storage = if config.storage.ephemeral {
            None
        } else {
            match SqliteStorage::from_config(&config.storage) {
                Ok(storage) => Some(storage),
                Err(error) => {
                    increment_counter!("persistence_degradations_total");
                    tracing::warn!(%error, "persistent storage unavailable, running memory-only");
                    None
                }
            }
        };

        let cache = AnalysisCache::new(Duration::hours(config.cache.ttl_hours as i64));
        let optimizer = MemoryOptimizer::new(config.session.max_session_tokens, &config.compaction);

        Ok(Self {
            config,
            storage,
            sessions: RwLock::new(HashMap::new()),
            cache,
            counter: TokenCounter::default(),
            optimizer,
            pricing: PricingTable::default(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    /// Replaces the default length estimator with an exact tokenizer
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.counter = TokenCounter::new(tokenizer);
        self
    }

    /// Replaces the default pricing table
    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    /// Whether writes are currently reaching persistent storage
    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    /// Number of live sessions in the index
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Creates a session and returns its identifier
    pub fn create_session(
        &self,
        session_type: &str,
        subject_id: Option<String>,
        metadata: SessionMetadata,
    ) -> String {
        let session = Session::new(session_type, subject_id, metadata);
        let session_id = session.session_id.clone();

        self.persist("save new session", |s| s.save_session(&session));
        self.sessions
            .write()
            .unwrap()
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));

        tracing::debug!(%session_id, session_type, "created session");
        session_id
    }

    /// Appends a message to a session
    ///
    /// When `token_count` is not supplied the configured tokenizer counts
    /// the content, falling back to the length estimator (and an
    /// `approximate` receipt) if it is unavailable. If the append pushes
    /// the session over the token ceiling, the compaction pipeline runs
    /// before this call returns.
    pub fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        token_count: Option<usize>,
    ) -> Append {
        let Some(handle) = self.session_handle(session_id) else {
            return Append::SessionNotFound;
        };

        let (tokens, approximate) = match token_count {
            Some(count) => (count, false),
            None => self.counter.measure(content),
        };

        let mut message = Message::new(role, content, tokens);
        message.metadata.approximate = approximate;

        let mut session = handle.lock().unwrap();
        session.push_message(message.clone());
        let seq = session.messages.len() - 1;

        let mut persisted = self
            .persist("append message", |s| {
                s.append_message(&session.session_id, seq, &message)?;
                s.save_session(&session)
            })
            .is_some();

        let compacted = if session.total_tokens > self.optimizer.ceiling() {
            let changed = self.optimizer.optimize(&mut session, &self.counter);
            if changed {
                // The stored rows no longer line up with the live list
                persisted &= self
                    .persist("rewrite compacted session", |s| {
                        s.replace_messages(&session.session_id, &session.messages)?;
                        s.save_session(&session)
                    })
                    .is_some();
            }
            changed
        } else {
            false
        };

        Append::Appended(AppendReceipt {
            token_count: tokens,
            approximate,
            persisted,
            compacted,
        })
    }

    /// Returns a snapshot of a session, or `None` if it is not live
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let handle = self.session_handle(session_id)?;
        let session = handle.lock().unwrap();
        Some(session.clone())
    }

    /// Returns a session's headline numbers, or `None` if it is not live
    pub fn get_session_stats(&self, session_id: &str) -> Option<SessionStats> {
        let handle = self.session_handle(session_id)?;
        let session = handle.lock().unwrap();
        Some(session.stats())
    }

    /// Returns a token-bounded, chronologically ordered history slice
    ///
    /// Never mutates the session. An unknown session yields an empty list.
    /// See [`window_history`] for the selection rules.
    pub fn get_history(&self, session_id: &str, max_tokens: usize) -> Vec<Message> {
        match self.session_handle(session_id) {
            Some(handle) => {
                let session = handle.lock().unwrap();
                window_history(&session.messages, max_tokens)
            }
            None => Vec::new(),
        }
    }

    /// Memoizes an analysis result and returns its cache key
    pub fn cache_put(&self, analysis_type: &str, input: &Value, result: Value) -> String {
        let entry = self.cache.put(analysis_type, input, result);
        self.persist("save cache entry", |s| s.save_cache_entry(&entry));
        entry.cache_key
    }

    /// Looks up a memoized analysis result
    ///
    /// The in-memory index answers first; on a miss the persistent store is
    /// consulted, and a still-fresh entry found there is promoted into the
    /// index. Expired, absent, and unreadable entries all report a plain
    /// [`CacheLookup::Miss`].
    pub fn cache_get(&self, analysis_type: &str, input: &Value) -> CacheLookup {
        if let CacheLookup::Hit(result) = self.cache.get(analysis_type, input) {
            self.record_cache_hit();
            return CacheLookup::Hit(result);
        }

        let (key, _) = cache_key(analysis_type, input);
        if let Some(Some(entry)) = self.persist("load cache entry", |s| s.load_cache_entry(&key)) {
            if entry.is_fresh(Utc::now(), self.cache.ttl()) {
                self.record_cache_hit();
                return CacheLookup::Hit(self.cache.promote(entry));
            }
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        increment_counter!("analysis_cache_misses_total");
        CacheLookup::Miss
    }

    /// Prices a session's conversation for the given model
    ///
    /// Non-model-authored messages are priced as input, model-authored ones
    /// as output. Unknown models fall back to the default pricing row with
    /// a logged warning. Updates the session's cached `total_cost` and
    /// returns it; `None` means the session is not live.
    pub fn calculate_cost(&self, session_id: &str, model: &str) -> Option<f64> {
        let handle = self.session_handle(session_id)?;
        let pricing = self.pricing.lookup(model);

        let mut session = handle.lock().unwrap();
        session.total_cost = conversation_cost(&session.messages, pricing);
        let cost = session.total_cost;
        self.persist("save session cost", |s| s.save_session(&session));
        Some(cost)
    }

    /// Restores recently active sessions from storage
    ///
    /// Loads sessions updated within the configured window, bounded in
    /// count and in messages per session; older history stays on disk.
    /// Live sessions are never clobbered by their stored copy. Returns the
    /// number of sessions restored.
    pub fn hydrate(&self) -> usize {
        // The index lock is held across the load so hydration cannot
        // interleave with the idle-session sweep.
        let mut sessions = self.sessions.write().unwrap();
        let loaded = self
            .persist("load recent sessions", |s| {
                s.load_recent_sessions(
                    self.config.session.hydrate_window_hours,
                    self.config.session.hydrate_session_limit,
                    self.config.session.hydrate_message_limit,
                )
            })
            .unwrap_or_default();

        let mut restored = 0;
        for session in loaded {
            if sessions.contains_key(&session.session_id) {
                continue;
            }
            sessions.insert(
                session.session_id.clone(),
                Arc::new(Mutex::new(session)),
            );
            restored += 1;
        }
        drop(sessions);

        if restored > 0 {
            tracing::info!(restored, "hydrated recent sessions from storage");
        }
        restored
    }

    /// Removes sessions idle for longer than `days`
    ///
    /// Purges them from the in-memory index and the persistent store, and
    /// returns how many were removed. Takes the session index lock, so the
    /// sweep serializes with [`MemoryManager::hydrate`] and with session
    /// creation.
    pub fn cleanup_old_sessions(&self, days: u64) -> usize {
        let cutoff = Utc::now() - Duration::days(days as i64);

        let mut sessions = self.sessions.write().unwrap();
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| handle.lock().unwrap().last_updated < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in &stale {
            sessions.remove(session_id);
            self.persist("delete session", |s| s.delete_session(session_id));
        }

        // Sessions that were never hydrated may still sit on disk
        let purged = self
            .persist("purge idle sessions", |s| s.purge_older_than(cutoff))
            .unwrap_or(0);
        drop(sessions);

        let removed = stale.len() + purged;
        if removed > 0 {
            tracing::info!(removed, "cleaned up idle sessions");
        }
        removed
    }

    /// Aggregated token, cost, and cache statistics across live sessions
    pub fn usage_stats(&self) -> UsageStats {
        let sessions = self.sessions.read().unwrap();
        let mut stats = UsageStats {
            session_count: sessions.len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            ..Default::default()
        };

        for handle in sessions.values() {
            let session = handle.lock().unwrap();
            let (input, output) = split_tokens(&session.messages);
            stats.input_tokens += input;
            stats.output_tokens += output;
            stats.total_tokens += session.total_tokens;
            stats.total_cost += session.total_cost;
        }

        stats.finalize()
    }

    /// Prioritized cost-reduction suggestions derived from current usage
    pub fn optimization_suggestions(&self) -> Vec<Suggestion> {
        suggestions_for(&self.usage_stats())
    }

    /// Writes every live session back to storage
    ///
    /// Called on shutdown so in-memory state (including any compaction that
    /// happened while storage was unavailable) reaches disk. Best-effort:
    /// failures degrade with a warning like every other write.
    pub fn flush(&self) {
        let sessions = self.sessions.read().unwrap();
        for handle in sessions.values() {
            let session = handle.lock().unwrap();
            self.persist("flush session", |s| {
                s.save_session(&session)?;
                s.replace_messages(&session.session_id, &session.messages)
            });
        }
    }

    fn session_handle(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Runs a storage operation, degrading to `None` on any failure
    fn persist<T>(
        &self,
        operation: &str,
        op: impl FnOnce(&SqliteStorage) -> Result<T>,
    ) -> Option<T> {
        let storage = self.storage.as_ref()?;
        match op(storage) {
            Ok(value) => Some(value),
            Err(error) => {
                increment_counter!("persistence_degradations_total");
                tracing::warn!(%error, operation, "storage degraded, continuing memory-only");
                None
            }
        }
    }

    fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        increment_counter!("analysis_cache_hits_total");
    }
}
