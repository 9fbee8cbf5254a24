use mnemo::config::MemoryConfig;
use mnemo::memory::MemoryManager;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create tempdir");
    let db_path = dir.path().join("memory.db");
    (dir, db_path)
}

#[allow(dead_code)]
pub fn manager_with_db(db_path: &Path) -> MemoryManager {
    let mut config = MemoryConfig::default();
    config.storage.db_path = Some(db_path.to_path_buf());
    MemoryManager::new(config).expect("failed to create manager")
}

#[allow(dead_code)]
pub fn ephemeral_manager() -> MemoryManager {
    let mut config = MemoryConfig::default();
    config.storage.ephemeral = true;
    MemoryManager::new(config).expect("failed to create manager")
}
