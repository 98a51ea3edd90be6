//! Persisted phase record
//!
//! The setup and reversal invocations of this program share no memory; they
//! coordinate through a tiny serialized record on disk. The workflow is
//! explicit and one-shot per job: `NotStarted -> SetupDone -> Reversed`,
//! written by the setup phase, read once by the post phase, never reset.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Where a job is in the setup/reversal workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// No setup has run; the post phase has nothing to reverse
    NotStarted,
    /// Setup ran (possibly partially); reversal is owed
    SetupDone,
    /// The paired reversal has completed
    Reversed,
}

#[derive(Debug, Serialize, Deserialize)]
struct PhaseRecord {
    phase: Phase,
}

/// Reads and writes the persisted phase record
#[derive(Debug, Clone)]
pub struct PhaseStore {
    path: PathBuf,
}

impl PhaseStore {
    /// Store backed by the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current phase.
    ///
    /// An absent file is `NotStarted`. An unreadable or corrupt record is
    /// treated as `SetupDone` with a warning: assuming reversal is owed is
    /// safe because the teardown engine no-ops when the host carries no
    /// installation, while assuming the opposite could strand a cluster on
    /// the host.
    pub async fn load(&self) -> Phase {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No phase record, treating as not started");
                return Phase::NotStarted;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable phase record, assuming reversal is owed");
                return Phase::SetupDone;
            }
        };

        match serde_json::from_str::<PhaseRecord>(&raw) {
            Ok(record) => record.phase,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt phase record, assuming reversal is owed");
                Phase::SetupDone
            }
        }
    }

    /// Persist a phase transition.
    pub async fn record(&self, phase: Phase) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::state(format!("cannot create state directory: {}", e)))?;
        }
        let body = serde_json::to_string(&PhaseRecord { phase })
            .map_err(|e| Error::state(e.to_string()))?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| Error::state(format!("cannot write phase record: {}", e)))?;
        debug!(path = %self.path.display(), ?phase, "Phase recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> PhaseStore {
        PhaseStore::new(dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn absent_record_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&dir).load().await, Phase::NotStarted);
    }

    #[tokio::test]
    async fn phases_round_trip_through_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for phase in [Phase::NotStarted, Phase::SetupDone, Phase::Reversed] {
            store.record(phase).await.unwrap();
            assert_eq!(store.load().await, phase);
        }
    }

    #[tokio::test]
    async fn record_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhaseStore::new(dir.path().join("nested").join("state.json"));
        store.record(Phase::SetupDone).await.unwrap();
        assert_eq!(store.load().await, Phase::SetupDone);
    }

    #[tokio::test]
    async fn corrupt_record_assumes_reversal_owed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), "{not json").await.unwrap();
        assert_eq!(store.load().await, Phase::SetupDone);
    }

    #[test]
    fn serialized_form_is_stable() {
        // The record is a cross-invocation contract; its wire form must not
        // drift with refactors.
        let body = serde_json::to_string(&PhaseRecord {
            phase: Phase::SetupDone,
        })
        .unwrap();
        assert_eq!(body, r#"{"phase":"setup-done"}"#);
    }
}
