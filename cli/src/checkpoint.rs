//! Per-stage ledger checkpoints
//!
//! Every completed stage is written as `NN-<stage>.json` so an interrupted run can be
//! picked up from the most advanced one.

use anyhow::{Context, Result};
use claims_model::{Ledger, Stage};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::files::{read_json, write_json};

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("{:02}-{}.json", stage.index(), stage.name()))
    }

    pub fn save(&self, ledger: &Ledger) -> Result<PathBuf> {
        let path = self.path(ledger.stage);
        write_json(&path, ledger)?;
        debug!("checkpoint {}", path.display());
        Ok(path)
    }

    /// Most advanced checkpoint on disk, if any
    pub fn latest(&self) -> Result<Option<Ledger>> {
        for stage in Stage::ALL.iter().rev() {
            let path = self.path(*stage);
            if !path.exists() {
                continue;
            }
            let ledger: Ledger = read_json(&path)?;
            if ledger.stage != *stage {
                anyhow::bail!(
                    "Checkpoint {} holds a {} ledger",
                    path.display(),
                    ledger.stage
                );
            }
            info!("resuming from {}", path.display());
            return Ok(Some(ledger));
        }
        Ok(None)
    }

    /// Remove checkpoints left by an earlier run
    pub fn clear(&self) -> Result<()> {
        for stage in Stage::ALL {
            let path = self.path(stage);
            if path.exists() {
                fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_at(stage: Stage) -> Ledger {
        Ledger {
            stage,
            ..Ledger::new()
        }
    }

    #[test]
    fn test_file_names() {
        let store = CheckpointStore::new("/tmp/cp");
        assert_eq!(store.path(Stage::Snapshot), PathBuf::from("/tmp/cp/00-snapshot.json"));
        assert_eq!(store.path(Stage::Settled), PathBuf::from("/tmp/cp/06-settled.json"));
    }

    #[test]
    fn test_latest_picks_most_advanced() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.latest().unwrap().is_none());

        store.save(&ledger_at(Stage::Snapshot)).unwrap();
        store.save(&ledger_at(Stage::NavComputed)).unwrap();
        store.save(&ledger_at(Stage::RemainingAllocated)).unwrap();

        assert_eq!(store.latest().unwrap().map(|l| l.stage), Some(Stage::NavComputed));
    }

    #[test]
    fn test_mislabelled_checkpoint_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        write_json(&store.path(Stage::Capped), &ledger_at(Stage::Snapshot)).unwrap();
        assert!(store.latest().is_err());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save(&ledger_at(Stage::Capped)).unwrap();
        store.clear().unwrap();
        assert!(store.latest().unwrap().is_none());
    }
}
