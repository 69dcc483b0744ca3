use crate::coordinator::state::RunState;
use crate::engine::InteractionHistory;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ALL_TIME_KEY: &str = "totalAllTimeComments";

/// `comments_today_<M/D/YYYY>`, no zero padding.
pub fn today_key(day: NaiveDate) -> String {
    format!("comments_today_{}", day.format("%-m/%-d/%Y"))
}

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub run: RunState,
    #[serde(default)]
    pub history: InteractionHistory,
}

impl PersistedState {
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Read-increment-write of one counter. Returns the new value.
    pub fn increment(&mut self, key: &str) -> u64 {
        let slot = self.counters.entry(key.to_string()).or_insert(0);
        *slot += 1;
        *slot
    }
}

/// JSON-file store. Writes go to a sibling temp file and are renamed over
/// the target so a crash never leaves a half-written document.
#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    doc: PersistedState,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file: {}", path.display()))
            }
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            doc,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: PersistedState::default(),
        }
    }

    pub fn doc(&self) -> &PersistedState {
        &self.doc
    }

    /// Mutate and persist in one step.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut PersistedState) -> R) -> Result<R> {
        let out = f(&mut self.doc);
        self.save()?;
        Ok(out)
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.doc).context("Failed to serialize state")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::Phase;

    #[test]
    fn test_today_key_format() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(today_key(day), "comments_today_3/7/2026");
        let day = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        assert_eq!(today_key(day), "comments_today_12/25/2026");
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("state.json")).unwrap();
        assert_eq!(store.doc(), &PersistedState::default());
    }

    #[test]
    fn test_update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path).unwrap();
        store
            .update(|doc| {
                doc.increment(ALL_TIME_KEY);
                doc.increment(ALL_TIME_KEY);
                doc.run.phase = Phase::Running;
                doc.run.current_comment_count = 2;
            })
            .unwrap();
        assert!(!dir.path().join("state.json.tmp").exists());

        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(reopened.doc().counter(ALL_TIME_KEY), 2);
        assert_eq!(reopened.doc().run.phase, Phase::Running);
        assert_eq!(reopened.doc().run.current_comment_count, 2);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = StateStore::open(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse state file"));
    }

    #[test]
    fn test_in_memory_never_touches_disk() {
        let mut store = StateStore::in_memory();
        let n = store.update(|doc| doc.increment("k")).unwrap();
        assert_eq!(n, 1);
    }
}
