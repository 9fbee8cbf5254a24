use crate::error::{MnemoError, Result};
use crate::memory::cache::CacheEntry;
use crate::memory::session::Session;
use crate::message::{Message, Role};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

/// Storage backend for sessions, messages, and cached analysis results
///
/// All writes are upserts, so retrying a failed call is always safe. Callers
/// treat any error from this layer as a degradation signal and continue
/// memory-only; nothing here is fatal to the conversation.
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Initializes the database file in the user's data directory.
    pub fn new() -> Result<Self> {
        Self::from_config(&crate::config::StorageConfig::default())
    }

    /// Create a storage instance resolved from configuration
    ///
    /// The `MNEMO_DB` environment variable overrides the configured path,
    /// which makes it easy to point at a test DB or alternate file without
    /// touching the user's application data dir.
    pub fn from_config(config: &crate::config::StorageConfig) -> Result<Self> {
        if let Ok(override_path) = std::env::var("MNEMO_DB") {
            return Self::new_with_path(override_path);
        }

        if let Some(path) = &config.db_path {
            return Self::new_with_path(path.clone());
        }

        let proj_dirs = ProjectDirs::from("com", "mnemo-rs", "mnemo")
            .ok_or_else(|| MnemoError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        let db_path = data_dir.join("memory.db");
        let storage = Self { db_path };

        storage.init()?;

        Ok(storage)
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// This is primarily useful for tests where the default application data
    /// directory is not desirable (for example, using a temporary directory).
    ///
    /// # Examples
    ///
    /// ```
    /// use mnemo::storage::SqliteStorage;
    ///
    /// let storage = SqliteStorage::new_with_path("/tmp/test_memory.db").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        // Ensure parent directory exists so opening the DB file succeeds.
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| MnemoError::Storage(e.to_string()))?;
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                session_type TEXT NOT NULL,
                subject_id TEXT,
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                total_tokens INTEGER NOT NULL,
                total_cost REAL NOT NULL,
                metadata JSON NOT NULL
            )",
            [],
        )
        .context("Failed to create sessions table")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                metadata JSON NOT NULL,
                PRIMARY KEY (session_id, seq),
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            )",
            [],
        )
        .context("Failed to create messages table")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_last_updated
                ON sessions(last_updated)",
            [],
        )
        .context("Failed to create session index")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS analysis_cache (
                cache_key TEXT PRIMARY KEY,
                analysis_type TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                result JSON NOT NULL,
                created_at TEXT NOT NULL,
                access_count INTEGER NOT NULL,
                last_accessed TEXT
            )",
            [],
        )
        .context("Failed to create analysis cache table")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Save or update a session record (messages are stored separately)
    pub fn save_session(&self, session: &Session) -> Result<()> {
        let conn = self.open()?;

        let metadata_json = serde_json::to_string(&session.metadata)
            .context("Failed to serialize session metadata")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        conn.execute(
            "INSERT OR REPLACE INTO sessions
                (session_id, session_type, subject_id, created_at, last_updated,
                 total_tokens, total_cost, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                session.session_id,
                session.session_type,
                session.subject_id,
                session.created_at.to_rfc3339(),
                session.last_updated.to_rfc3339(),
                session.total_tokens as i64,
                session.total_cost,
                metadata_json,
            ],
        )
        .context("Failed to save session")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Save one message at its position in the session
    ///
    /// Keyed by `(session_id, seq)`, so retrying the same append overwrites
    /// the same row instead of duplicating it.
    pub fn append_message(&self, session_id: &str, seq: usize, message: &Message) -> Result<()> {
        let conn = self.open()?;

        let metadata_json = serde_json::to_string(&message.metadata)
            .context("Failed to serialize message metadata")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        conn.execute(
            "INSERT OR REPLACE INTO messages
                (session_id, seq, role, content, timestamp, token_count, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                session_id,
                seq as i64,
                message.role.as_str(),
                message.content,
                message.timestamp.to_rfc3339(),
                message.token_count as i64,
                metadata_json,
            ],
        )
        .context("Failed to append message")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Replace a session's stored messages wholesale
    ///
    /// Used after compaction, when the live message list no longer lines up
    /// with the previously appended rows.
    pub fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut conn = self.open()?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        tx.execute(
            "DELETE FROM messages WHERE session_id = ?",
            params![session_id],
        )
        .context("Failed to clear messages")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        for (seq, message) in messages.iter().enumerate() {
            let metadata_json = serde_json::to_string(&message.metadata)
                .context("Failed to serialize message metadata")
                .map_err(|e| MnemoError::Storage(e.to_string()))?;

            tx.execute(
                "INSERT INTO messages
                    (session_id, seq, role, content, timestamp, token_count, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    session_id,
                    seq as i64,
                    message.role.as_str(),
                    message.content,
                    message.timestamp.to_rfc3339(),
                    message.token_count as i64,
                    metadata_json,
                ],
            )
            .context("Failed to insert message")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Load sessions updated within the last `window_hours`
    ///
    /// Returns at most `session_limit` sessions, most recently updated first,
    /// each carrying its `message_limit` most recent messages in
    /// chronological order. Older history stays on disk. `total_tokens` is
    /// recounted from the loaded messages so the in-memory invariant holds
    /// even for a truncated load.
    pub fn load_recent_sessions(
        &self,
        window_hours: u64,
        session_limit: usize,
        message_limit: usize,
    ) -> Result<Vec<Session>> {
        let conn = self.open()?;
        let cutoff = (Utc::now() - Duration::hours(window_hours as i64)).to_rfc3339();

        let mut stmt = conn
            .prepare(
                "SELECT session_id, session_type, subject_id, created_at, last_updated,
                        total_cost, metadata
                FROM sessions
                WHERE last_updated >= ?
                ORDER BY last_updated DESC
                LIMIT ?",
            )
            .context("Failed to prepare session query")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![cutoff, session_limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query sessions")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        let mut loaded = Vec::new();
        for (session_id, session_type, subject_id, created_at, last_updated, total_cost, metadata) in
            rows.flatten()
        {
            let messages = self.load_recent_messages(&conn, &session_id, message_limit)?;
            let mut session = Session {
                session_id,
                session_type,
                subject_id,
                messages,
                created_at: parse_rfc3339(&created_at),
                last_updated: parse_rfc3339(&last_updated),
                total_tokens: 0,
                total_cost,
                metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            };
            session.recount_tokens();
            loaded.push(session);
        }

        Ok(loaded)
    }

    /// Load the `limit` most recent messages of a session, oldest first
    fn load_recent_messages(
        &self,
        conn: &Connection,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut stmt = conn
            .prepare(
                "SELECT role, content, timestamp, token_count, metadata
                FROM messages
                WHERE session_id = ?
                ORDER BY seq DESC
                LIMIT ?",
            )
            .context("Failed to prepare message query")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![session_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query messages")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        let mut messages = Vec::new();
        for (role, content, timestamp, token_count, metadata) in rows.flatten() {
            let role = match role.parse::<Role>() {
                Ok(role) => role,
                Err(_) => {
                    tracing::warn!(session_id, role, "skipping message with unknown role");
                    continue;
                }
            };
            messages.push(Message {
                role,
                content,
                timestamp: parse_rfc3339(&timestamp),
                token_count: token_count.max(0) as usize,
                metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            });
        }

        // Query returned newest first
        messages.reverse();
        Ok(messages)
    }

    /// Save or update a cached analysis result
    pub fn save_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.open()?;

        let result_json = serde_json::to_string(&entry.result)
            .context("Failed to serialize cache result")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        conn.execute(
            "INSERT OR REPLACE INTO analysis_cache
                (cache_key, analysis_type, input_hash, result, created_at,
                 access_count, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.cache_key,
                entry.analysis_type,
                entry.input_hash,
                result_json,
                entry.created_at.to_rfc3339(),
                entry.access_count as i64,
                entry.last_accessed.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to save cache entry")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Load a cached analysis result by key
    ///
    /// A row whose stored result no longer deserializes is reported as an
    /// error; callers treat it as a miss and the next `put` overwrites it.
    pub fn load_cache_entry(&self, cache_key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.open()?;

        let row = conn
            .query_row(
                "SELECT analysis_type, input_hash, result, created_at,
                        access_count, last_accessed
                FROM analysis_cache
                WHERE cache_key = ?",
                params![cache_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query cache entry")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        match row {
            Some((analysis_type, input_hash, result_json, created_at, access_count, last_accessed)) => {
                let result = serde_json::from_str(&result_json)
                    .context("Failed to deserialize cache result")
                    .map_err(|e| MnemoError::Storage(e.to_string()))?;
                Ok(Some(CacheEntry {
                    cache_key: cache_key.to_string(),
                    analysis_type,
                    input_hash,
                    result,
                    created_at: parse_rfc3339(&created_at),
                    access_count: access_count.max(0) as u64,
                    last_accessed: last_accessed.as_deref().map(parse_rfc3339),
                }))
            }
            None => Ok(None),
        }
    }

    /// Delete a session and its messages
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.open()?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        tx.execute(
            "DELETE FROM messages WHERE session_id = ?",
            params![session_id],
        )
        .context("Failed to delete messages")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        tx.execute(
            "DELETE FROM sessions WHERE session_id = ?",
            params![session_id],
        )
        .context("Failed to delete session")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Delete every session last updated before `cutoff`
    ///
    /// Returns the number of sessions removed.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.open()?;
        let cutoff = cutoff.to_rfc3339();

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        tx.execute(
            "DELETE FROM messages WHERE session_id IN
                (SELECT session_id FROM sessions WHERE last_updated < ?)",
            params![cutoff],
        )
        .context("Failed to purge messages")
        .map_err(|e| MnemoError::Storage(e.to_string()))?;

        let purged = tx
            .execute(
                "DELETE FROM sessions WHERE last_updated < ?",
                params![cutoff],
            )
            .context("Failed to purge sessions")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| MnemoError::Storage(e.to_string()))?;

        Ok(purged)
    }
}

/// Parse a stored RFC-3339 timestamp, falling back to now on a bad row
fn parse_rfc3339(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
