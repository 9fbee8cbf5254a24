//! Integration tests for session and cache persistence
//!
//! Covers restart recovery (hydrate), the idle-session sweep, cache
//! promotion from disk, and graceful degradation when the persistence
//! layer is unavailable or holds corrupt rows.

mod common;

use common::{manager_with_db, temp_db};
use chrono::{Duration, Utc};
use mnemo::config::MemoryConfig;
use mnemo::memory::{cache_key, CacheLookup, MemoryManager, SessionMetadata};
use mnemo::message::Role;
use mnemo::Append;
use rusqlite::{params, Connection};
use serde_json::json;

#[test]
fn test_hydrate_restores_recent_sessions() {
    let (_dir, db_path) = temp_db();

    let first = manager_with_db(&db_path);
    let a = first.create_session("incident_analysis", None, SessionMetadata::default());
    let b = first.create_session("causal", Some("incident_007".to_string()), SessionMetadata::default());
    first.add_message(&a, Role::System, "you are an incident analyst", Some(50));
    first.add_message(&a, Role::User, "what happened?", Some(20));
    first.add_message(&b, Role::User, "why did it happen?", Some(25));
    let cost = first.calculate_cost(&a, "gpt-4o").expect("cost");
    drop(first);

    let second = manager_with_db(&db_path);
    assert_eq!(second.session_count(), 0);
    assert_eq!(second.hydrate(), 2);

    let restored = second.get_session(&a).expect("session restored");
    assert_eq!(restored.messages.len(), 2);
    assert_eq!(restored.total_tokens, 70);
    assert_eq!(restored.total_cost, cost);
    assert_eq!(
        second
            .get_session(&b)
            .expect("session restored")
            .subject_id
            .as_deref(),
        Some("incident_007")
    );

    // Restored history windows like it never left
    let window = second.get_history(&a, 1_000);
    assert_eq!(window[0].role, Role::System);
}

#[test]
fn test_hydrate_loads_bounded_recent_messages() {
    let (_dir, db_path) = temp_db();

    let first = manager_with_db(&db_path);
    let id = first.create_session("incident_analysis", None, SessionMetadata::default());
    for i in 0..10 {
        first.add_message(&id, Role::User, &format!("turn {}", i), Some(10));
    }
    drop(first);

    let mut config = MemoryConfig::default();
    config.storage.db_path = Some(db_path);
    config.session.hydrate_message_limit = 3;
    let second = MemoryManager::new(config).expect("manager");
    second.hydrate();

    let session = second.get_session(&id).expect("session");
    let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["turn 7", "turn 8", "turn 9"]);
    // The token invariant holds over what was actually loaded
    assert_eq!(session.total_tokens, 30);
}

#[test]
fn test_hydrate_does_not_clobber_live_sessions() {
    let (_dir, db_path) = temp_db();

    let first = manager_with_db(&db_path);
    let id = first.create_session("incident_analysis", None, SessionMetadata::default());
    first.add_message(&id, Role::User, "persisted turn", Some(10));
    drop(first);

    let second = manager_with_db(&db_path);
    assert_eq!(second.hydrate(), 1);
    second.add_message(&id, Role::User, "live turn", Some(10));

    // A repeat hydrate restores nothing and loses nothing
    assert_eq!(second.hydrate(), 0);
    let session = second.get_session(&id).expect("session");
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[1].content, "live turn");
}

#[test]
fn test_cleanup_purges_sessions_idle_on_disk() {
    let (_dir, db_path) = temp_db();

    let first = manager_with_db(&db_path);
    let a = first.create_session("incident_analysis", None, SessionMetadata::default());
    first.add_message(&a, Role::User, "old news", Some(10));
    let keep = first.create_session("incident_analysis", None, SessionMetadata::default());
    first.add_message(&keep, Role::User, "recent", Some(10));
    drop(first);

    // Age the first session well past the idle window
    let conn = Connection::open(&db_path).expect("open db");
    let old = (Utc::now() - Duration::days(30)).to_rfc3339();
    conn.execute(
        "UPDATE sessions SET last_updated = ? WHERE session_id = ?",
        params![old, a],
    )
    .expect("age session");

    let second = manager_with_db(&db_path);
    assert_eq!(second.cleanup_old_sessions(7), 1);

    // Only the recent session is left to hydrate
    assert_eq!(second.hydrate(), 1);
    assert!(second.get_session(&keep).is_some());
    assert!(second.get_session(&a).is_none());
}

#[test]
fn test_degraded_storage_runs_memory_only() {
    let (dir, _) = temp_db();
    // Parent of the configured path is a file, so the store cannot open
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").expect("write blocker");

    let mut config = MemoryConfig::default();
    config.storage.db_path = Some(blocker.join("memory.db"));
    let manager = MemoryManager::new(config).expect("manager still constructs");
    assert!(!manager.is_persistent());

    let id = manager.create_session("incident_analysis", None, SessionMetadata::default());
    let append = manager.add_message(&id, Role::User, "still works", Some(10));
    let Append::Appended(receipt) = append else {
        panic!("append should succeed in memory");
    };
    assert!(!receipt.persisted);

    // Everything above storage behaves normally
    assert_eq!(manager.get_history(&id, 100).len(), 1);
    assert!(manager.calculate_cost(&id, "gpt-4o").is_some());
    assert_eq!(manager.hydrate(), 0);
}

#[test]
fn test_cache_entry_survives_restart() {
    let (_dir, db_path) = temp_db();
    let input = json!({"narrative": "breaker tripped"});
    let result = json!({"classification": "electrical"});

    let first = manager_with_db(&db_path);
    first.cache_put("incident", &input, result.clone());
    drop(first);

    let second = manager_with_db(&db_path);
    // First lookup promotes the entry from disk, the next answers from memory
    assert_eq!(
        second.cache_get("incident", &input),
        CacheLookup::Hit(result.clone())
    );
    assert_eq!(second.cache_get("incident", &input), CacheLookup::Hit(result));
}

#[test]
fn test_expired_entry_on_disk_misses() {
    let (_dir, db_path) = temp_db();
    let input = json!({"id": 9});

    let first = manager_with_db(&db_path);
    let key = first.cache_put("incident", &input, json!("stale"));
    drop(first);

    // Age the stored entry past the default TTL
    let conn = Connection::open(&db_path).expect("open db");
    let old = (Utc::now() - Duration::hours(48)).to_rfc3339();
    conn.execute(
        "UPDATE analysis_cache SET created_at = ? WHERE cache_key = ?",
        params![old, key],
    )
    .expect("age entry");

    let second = manager_with_db(&db_path);
    assert_eq!(second.cache_get("incident", &input), CacheLookup::Miss);
}

#[test]
fn test_corrupt_cache_entry_treated_as_miss_until_overwritten() {
    let (_dir, db_path) = temp_db();
    let manager = manager_with_db(&db_path);
    let input = json!({"id": 3});
    let (key, input_hash) = cache_key("incident", &input);

    // Plant an unreadable row under the real key
    let conn = Connection::open(&db_path).expect("open db");
    conn.execute(
        "INSERT INTO analysis_cache
            (cache_key, analysis_type, input_hash, result, created_at, access_count)
        VALUES (?, 'incident', ?, '{not json', ?, 0)",
        params![key, input_hash, Utc::now().to_rfc3339()],
    )
    .expect("insert corrupt row");

    assert_eq!(manager.cache_get("incident", &input), CacheLookup::Miss);

    // The next put overwrites the bad row and lookups recover
    manager.cache_put("incident", &input, json!("fresh"));
    assert_eq!(
        manager.cache_get("incident", &input),
        CacheLookup::Hit(json!("fresh"))
    );
    drop(manager);

    let second = manager_with_db(&db_path);
    assert_eq!(
        second.cache_get("incident", &input),
        CacheLookup::Hit(json!("fresh"))
    );
}

#[test]
fn test_flush_writes_sessions_back() {
    let (_dir, db_path) = temp_db();

    let first = manager_with_db(&db_path);
    let id = first.create_session("incident_analysis", None, SessionMetadata::default());
    first.add_message(&id, Role::User, "turn one", Some(10));
    first.add_message(&id, Role::Assistant, "reply", Some(20));
    first.calculate_cost(&id, "gpt-4o-mini");
    first.flush();
    drop(first);

    let second = manager_with_db(&db_path);
    second.hydrate();
    let session = second.get_session(&id).expect("session");
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.total_tokens, 30);
    assert!(session.total_cost > 0.0);
}

#[test]
fn test_compacted_session_restores_compacted() {
    let (_dir, db_path) = temp_db();

    let mut config = MemoryConfig::default();
    config.storage.db_path = Some(db_path.clone());
    config.session.max_session_tokens = 500;
    let first = MemoryManager::new(config).expect("manager");

    let id = first.create_session("incident_analysis", None, SessionMetadata::default());
    for i in 0..30 {
        first.add_message(&id, Role::User, &format!("turn {}", i), Some(30));
    }
    let live = first.get_session(&id).expect("session");
    assert!(live.total_tokens <= 500);
    drop(first);

    // What was persisted is the compacted shape, not the original turns
    let second = manager_with_db(&db_path);
    second.hydrate();
    let restored = second.get_session(&id).expect("session");
    assert_eq!(restored.messages.len(), live.messages.len());
    assert!(restored
        .messages
        .iter()
        .any(|m| m.metadata.compacted_from.is_some()));
}
