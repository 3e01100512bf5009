//! Source-to-target identifier remap.
//!
//! When the target assigns a different auto-increment value than the source
//! row carried, the pair is recorded as `"<table>.<sourceId>" -> targetId`.
//! Entries are only ever added. The map is written once at the end of a run
//! and never read back by the engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

/// Thread-safe, append-only identifier remap.
#[derive(Debug, Default)]
pub struct IdentifierRemap {
    entries: Mutex<BTreeMap<String, i64>>,
}

impl IdentifierRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a remapped identifier. An existing key is left untouched.
    pub fn record(&self, table: &str, source_id: i64, target_id: i64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(format!("{}.{}", table, source_id))
            .or_insert(target_id);
    }

    /// Target id recorded for a source row.
    pub fn get(&self, table: &str, source_id: i64) -> Option<i64> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&format!("{}.{}", table, source_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current entries, keys sorted.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Write the remap as a pretty-printed JSON object.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        write_atomic(path.as_ref(), &content)
    }
}

/// Atomic write: write to a temp file next to `path`, then rename over it.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_record_is_append_only() {
        let remap = IdentifierRemap::new();
        remap.record("Users", 7, 101);
        remap.record("Users", 7, 202);
        assert_eq!(remap.get("Users", 7), Some(101));
        assert_eq!(remap.len(), 1);
    }

    #[test]
    fn test_save_writes_sorted_flat_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("id-mappings.json");

        let remap = IdentifierRemap::new();
        remap.record("Users", 2, 12);
        remap.record("Accounts", 5, 9);
        remap.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["Accounts.5"], 9);
        assert_eq!(parsed["Users.2"], 12);
        assert!(content.find("Accounts.5").unwrap() < content.find("Users.2").unwrap());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_empty_remap_saves_empty_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("id-mappings.json");
        IdentifierRemap::new().save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "{}");
    }

    #[test]
    fn test_concurrent_records() {
        let remap = Arc::new(IdentifierRemap::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let remap = Arc::clone(&remap);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        remap.record("Orders", t * 100 + i, 10_000 + t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(remap.len(), 400);
    }
}
