//! The snapshot store.
//!
//! The whole logical dataset lives in memory and is mirrored to a single
//! on-disk JSON document after every mutation. The in-memory value is
//! authoritative: a persistence failure is logged and swallowed, never
//! propagated, and the process keeps serving from memory.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tutorlink_protocol::Dataset;

/// Store errors. Only loading can fail; mutations never surface errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Snapshot file exists but cannot be read.
    #[error("Failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Snapshot file exists but is not a valid dataset document.
    #[error("Failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// In-memory dataset with write-through persistence to one JSON file.
pub struct SnapshotStore {
    data: RwLock<Dataset>,
    path: Option<PathBuf>,
}

impl SnapshotStore {
    /// Load the last-persisted dataset, or an empty one if no snapshot file
    /// exists. Absence of the file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let dataset = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;
            let dataset: Dataset =
                serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?;
            info!(
                path = %path.display(),
                slots = dataset.slots.len(),
                lessons = dataset.lessons.len(),
                "Loaded snapshot"
            );
            dataset
        } else {
            info!(path = %path.display(), "No snapshot file, starting empty");
            Dataset::default()
        };

        Ok(Self {
            data: RwLock::new(dataset),
            path: Some(path),
        })
    }

    /// Create a store that never touches disk. Used by tests and tooling.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(Dataset::default()),
            path: None,
        }
    }

    /// Apply a mutation and mirror the result to disk.
    ///
    /// The closure runs under the write lock, so mutations are serialized
    /// and no reader ever observes a partially-mutated dataset. Persistence
    /// happens before the lock is released, which keeps the on-disk write
    /// order identical to the mutation order.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Dataset) -> R) -> R {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let result = f(&mut data);
        self.persist(&data);
        result
    }

    /// Run a read-only closure against the current dataset.
    pub fn read<R>(&self, f: impl FnOnce(&Dataset) -> R) -> R {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        f(&data)
    }

    /// Clone the entire dataset, e.g. for the full-state push on connect.
    #[must_use]
    pub fn snapshot(&self) -> Dataset {
        self.read(Dataset::clone)
    }

    /// Remove every slot dated before `cutoff` and persist if any were
    /// removed. Run once at process start.
    pub fn sweep_expired(&self, cutoff: NaiveDate) -> usize {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let before = data.slots.len();
        data.slots
            .retain(|slot| slot.date.map_or(true, |date| date >= cutoff));
        let removed = before - data.slots.len();

        if removed > 0 {
            info!(removed, %cutoff, "Retention sweep removed expired slots");
            self.persist(&data);
        }
        removed
    }

    /// Full-document overwrite of the snapshot file. Failures are logged;
    /// the in-memory state stays authoritative for the process lifetime.
    fn persist(&self, data: &Dataset) {
        let Some(path) = &self.path else {
            return;
        };

        match serde_json::to_vec_pretty(data) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(path, contents) {
                    error!(path = %path.display(), error = %e, "Snapshot write failed");
                } else {
                    debug!(path = %path.display(), "Snapshot persisted");
                }
            }
            Err(e) => {
                warn!(error = %e, "Snapshot serialization failed");
            }
        }
    }

    /// The snapshot file path, if this store persists at all.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorlink_protocol::model::generate_id;
    use tutorlink_protocol::Slot;

    fn temp_snapshot_path() -> PathBuf {
        std::env::temp_dir().join(format!("{}.json", generate_id("tutorlink-snap")))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let path = temp_snapshot_path();
        let store = SnapshotStore::load(&path).unwrap();
        assert!(store.snapshot().slots.is_empty());
    }

    #[test]
    fn test_mutate_persists_and_reloads() {
        let path = temp_snapshot_path();

        {
            let store = SnapshotStore::load(&path).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
            store.mutate(|data| {
                data.slots.push(Slot {
                    id: "slot_1".into(),
                    teacher_id: "t1".into(),
                    subject: "Math".into(),
                    ..Slot::default()
                });
            });
        }

        let reloaded = SnapshotStore::load(&path).unwrap();
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.slots.len(), 1);
        assert_eq!(snapshot.slots[0].id, "slot_1");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_corrupt_snapshot() {
        let path = temp_snapshot_path();
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            SnapshotStore::load(&path),
            Err(StoreError::Parse { .. })
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sweep_removes_expired_slots_in_memory_and_on_disk() {
        let path = temp_snapshot_path();
        let store = SnapshotStore::load(&path).unwrap();

        let slot = |id: &str, date: &str| Slot {
            id: id.into(),
            teacher_id: "t1".into(),
            date: Some(date.parse().unwrap()),
            ..Slot::default()
        };
        let old_a = slot("old_a", "2024-11-01");
        let old_b = slot("old_b", "2024-12-01");
        let old_c = slot("old_c", "2024-12-31");
        let fresh_a = slot("fresh_a", "2025-01-20");
        let fresh_b = slot("fresh_b", "2025-02-05");

        store.mutate(|data| {
            data.slots = vec![old_a, old_b, old_c, fresh_a, fresh_b];
        });

        let cutoff: NaiveDate = "2025-01-01".parse().unwrap();
        assert_eq!(store.sweep_expired(cutoff), 3);
        assert_eq!(store.snapshot().slots.len(), 2);

        // The persisted file matches the swept state.
        let reloaded = SnapshotStore::load(&path).unwrap();
        let ids: Vec<String> = reloaded.snapshot().slots.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["fresh_a", "fresh_b"]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sweep_keeps_undated_slots() {
        let store = SnapshotStore::in_memory();
        store.mutate(|data| {
            data.slots.push(Slot {
                id: "undated".into(),
                ..Slot::default()
            });
        });

        assert_eq!(store.sweep_expired("2025-01-01".parse().unwrap()), 0);
        assert_eq!(store.snapshot().slots.len(), 1);
    }
}
