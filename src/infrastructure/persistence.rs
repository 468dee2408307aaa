//! Iteration persistence backends.
//!
//! Both stores follow the port's last-write-wins contract per key. The file
//! store writes one pretty JSON document per iteration so a run directory
//! can be inspected or resumed by hand.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::ports::{IterationStore, StoredFinal, StoredIteration};

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryIterationStore {
    iterations: BTreeMap<usize, StoredIteration>,
    finals: Vec<StoredFinal>,
}

impl MemoryIterationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    pub fn last_final(&self) -> Option<&StoredFinal> {
        self.finals.last()
    }
}

impl IterationStore for MemoryIterationStore {
    fn save_iteration(&mut self, record: &StoredIteration) -> Result<()> {
        self.iterations.insert(record.index, record.clone());
        Ok(())
    }

    fn save_final(&mut self, record: &StoredFinal) -> Result<()> {
        self.finals.push(record.clone());
        Ok(())
    }

    fn load_iteration(&self, index: usize) -> Result<Option<StoredIteration>> {
        Ok(self.iterations.get(&index).cloned())
    }
}

/// Disk-backed store writing into one directory per run.
pub struct JsonFileIterationStore {
    run_dir: PathBuf,
}

impl JsonFileIterationStore {
    pub fn new(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        if !run_dir.exists() {
            fs::create_dir_all(&run_dir)
                .context(format!("Failed to create run directory {:?}", run_dir))?;
        }
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn iteration_path(&self, index: usize) -> PathBuf {
        self.run_dir.join(format!("iteration_{:03}.json", index))
    }

    // Atomic write: temp file then rename.
    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let content =
            serde_json::to_string_pretty(value).context("Failed to serialize record")?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content).context("Failed to write temp file")?;
        fs::rename(&temp_path, path).context("Failed to rename temp file")?;
        Ok(())
    }
}

impl IterationStore for JsonFileIterationStore {
    fn save_iteration(&mut self, record: &StoredIteration) -> Result<()> {
        let path = self.iteration_path(record.index);
        self.write_json(&path, record)?;
        info!(index = record.index, path = %path.display(), "iteration saved");
        Ok(())
    }

    fn save_final(&mut self, record: &StoredFinal) -> Result<()> {
        let path = self.run_dir.join("final.json");
        self.write_json(&path, record)?;
        info!(path = %path.display(), "final result saved");
        Ok(())
    }

    fn load_iteration(&self, index: usize) -> Result<Option<StoredIteration>> {
        let path = self.iteration_path(index);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read iteration file {:?}", path))?;
        let record: StoredIteration =
            serde_json::from_str(&content).context("Failed to parse iteration JSON")?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn iteration(index: usize, rule: &str) -> StoredIteration {
        let mut metrics = HashMap::new();
        metrics.insert("total_profit".to_string(), 42.0);
        StoredIteration {
            index,
            metrics,
            rule: rule.to_string(),
            filters: vec!["avoid_hour_9".to_string()],
            duration_ms: 12,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_last_write_wins() {
        let mut store = MemoryIterationStore::new();
        store.save_iteration(&iteration(1, "first")).unwrap();
        store.save_iteration(&iteration(1, "second")).unwrap();

        assert_eq!(store.iteration_count(), 1);
        let loaded = store.load_iteration(1).unwrap().unwrap();
        assert_eq!(loaded.rule, "second");
        assert!(store.load_iteration(2).unwrap().is_none());
    }

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileIterationStore::new(dir.path().join("run")).unwrap();

        store.save_iteration(&iteration(3, "return allow_entry")).unwrap();

        let loaded = store.load_iteration(3).unwrap().unwrap();
        assert_eq!(loaded.index, 3);
        assert_eq!(loaded.rule, "return allow_entry");
        assert_eq!(loaded.filters, vec!["avoid_hour_9".to_string()]);
        assert!(store.load_iteration(4).unwrap().is_none());
    }

    #[test]
    fn test_json_store_writes_final_document() {
        let dir = tempdir().unwrap();
        let mut store = JsonFileIterationStore::new(dir.path()).unwrap();

        let record = StoredFinal {
            run_id: "abc".to_string(),
            iterations: 2,
            metrics: HashMap::new(),
            rule: "return allow_entry".to_string(),
            filters: vec![],
            stop_reason: "converged".to_string(),
            saved_at: Utc::now(),
        };
        store.save_final(&record).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("final.json")).unwrap();
        assert!(raw.contains("\"stop_reason\": \"converged\""));
        assert!(raw.contains("\"run_id\": \"abc\""));
    }
}
