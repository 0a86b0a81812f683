//! Durable per-source offense ledger.
//!
//! The in-memory map is authoritative for the process lifetime; the
//! JSON file behind it is read once at startup and rewritten in full on
//! every offense or unblock so escalation survives restarts. A failed
//! or slow write is reported and otherwise ignored — persistence must
//! never stall or fail request handling.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use dashmap::DashMap;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::ReputationConfig;
use crate::utils::unix_timestamp_f64;

/// Errors that can occur while persisting the ledger
#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Cumulative offense record for a single source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReputationEntry {
    /// Number of confirmed offenses; only an explicit unblock resets it
    pub count: u64,
    /// Unix timestamp of the most recent offense
    pub last_seen: f64,
}

/// Offense ledger with write-new-then-replace durability.
pub struct ReputationStore {
    entries: DashMap<String, ReputationEntry>,
    path: PathBuf,
    /// Serializes writers so partial writes never interleave
    write_lock: Mutex<()>,
    write_timeout: Duration,
}

impl ReputationStore {
    /// Load the ledger from disk; a missing or corrupt file degrades to
    /// an empty ledger.
    pub fn load(config: &ReputationConfig) -> Self {
        let path = PathBuf::from(&config.path);
        let entries = DashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, ReputationEntry>>(&raw) {
                Ok(stored) => {
                    for (source, entry) in stored {
                        entries.insert(source, entry);
                    }
                }
                Err(e) => warn!(
                    "ignoring unreadable reputation ledger {}: {}",
                    path.display(),
                    e
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to read reputation ledger {}: {}", path.display(), e),
        }

        Self {
            entries,
            path,
            write_lock: Mutex::new(()),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
        }
    }

    /// Record one offense and return the new cumulative count
    pub fn record_offense(&self, source: &str) -> u64 {
        let mut entry = self
            .entries
            .entry(source.to_string())
            .or_insert(ReputationEntry {
                count: 0,
                last_seen: 0.0,
            });
        entry.count += 1;
        entry.last_seen = unix_timestamp_f64();
        entry.count
    }

    /// Current offense count for a source, zero if unknown
    pub fn count(&self, source: &str) -> u64 {
        self.entries.get(source).map_or(0, |e| e.count)
    }

    /// Drop a source from the ledger; returns whether it existed
    pub fn remove(&self, source: &str) -> bool {
        self.entries.remove(source).is_some()
    }

    /// Point-in-time copy of the ledger
    pub fn snapshot(&self) -> HashMap<String, ReputationEntry> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Rewrite the ledger file from the in-memory state.
    ///
    /// Writes a sibling temp file and renames it over the ledger so a
    /// crash mid-write never leaves a torn file behind.
    pub async fn persist(&self) -> Result<(), ReputationError> {
        let serialized = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Persist with a bounded timeout, reporting failures instead of
    /// propagating them; the in-memory ledger stays authoritative.
    pub async fn persist_or_log(&self) {
        match tokio::time::timeout(self.write_timeout, self.persist()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("reputation ledger write failed: {}", e),
            Err(_) => error!(
                "reputation ledger write timed out after {:?}",
                self.write_timeout
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config() -> ReputationConfig {
        let path = std::env::temp_dir().join(format!("reputation-{}.json", uuid::Uuid::new_v4()));
        ReputationConfig {
            path: path.to_string_lossy().into_owned(),
            write_timeout_secs: 1,
        }
    }

    #[test]
    fn test_offense_counts_are_monotonic() {
        let store = ReputationStore::load(&temp_config());

        assert_eq!(store.count("10.0.0.1"), 0);
        assert_eq!(store.record_offense("10.0.0.1"), 1);
        assert_eq!(store.record_offense("10.0.0.1"), 2);
        assert_eq!(store.record_offense("10.0.0.1"), 3);
        assert_eq!(store.count("10.0.0.1"), 3);
    }

    #[test]
    fn test_remove_clears_the_entry() {
        let store = ReputationStore::load(&temp_config());
        store.record_offense("10.0.0.1");

        assert!(store.remove("10.0.0.1"));
        assert_eq!(store.count("10.0.0.1"), 0);
        // removing again is a no-op
        assert!(!store.remove("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_ledger_round_trips_through_disk() {
        let config = temp_config();

        let store = ReputationStore::load(&config);
        store.record_offense("10.0.0.1");
        store.record_offense("10.0.0.1");
        store.record_offense("10.0.0.2");
        store.persist().await.unwrap();

        let reloaded = ReputationStore::load(&config);
        assert_eq!(reloaded.count("10.0.0.1"), 2);
        assert_eq!(reloaded.count("10.0.0.2"), 1);

        let _ = std::fs::remove_file(&config.path);
    }

    #[test]
    fn test_corrupt_ledger_degrades_to_empty() {
        let config = temp_config();
        std::fs::write(&config.path, "{not json").unwrap();

        let store = ReputationStore::load(&config);
        assert_eq!(store.snapshot().len(), 0);

        let _ = std::fs::remove_file(&config.path);
    }

    #[tokio::test]
    async fn test_persist_or_log_swallows_failures() {
        let config = ReputationConfig {
            path: "/nonexistent-dir/ledger.json".to_string(),
            write_timeout_secs: 1,
        };
        let store = ReputationStore::load(&config);
        store.record_offense("10.0.0.1");

        // must not panic or propagate
        store.persist_or_log().await;
        assert_eq!(store.count("10.0.0.1"), 1);
    }
}
