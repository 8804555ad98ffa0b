//! Last-processed SKU persistence and the resume plan derived from it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::Dataset;

/// Persists the SKU of the most recently processed record.
pub trait CheckpointStore {
    fn load(&self) -> Result<Option<String>>;
    fn save(&mut self, sku: &str) -> Result<()>;
}

/// Single plaintext value in a file, replaced on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the stored value. Missing file is not an error.
    pub fn reset(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => {
                let v = s.trim();
                Ok((!v.is_empty()).then(|| v.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read checkpoint {}", self.path.display())),
        }
    }

    /// Written to `<file>.tmp` and renamed over the old value, so a crash never
    /// leaves an empty checkpoint.
    fn save(&mut self, sku: &str) -> Result<()> {
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        fs::write(&tmp, sku).with_context(|| format!("write checkpoint {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace checkpoint {}", self.path.display()))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResumeError {
    #[error(
        "checkpoint sku `{0}` is not in the dataset and the dataset is not sorted by sku; \
         reset the checkpoint or sort the input"
    )]
    Unplaceable(String),
}

/// Which rows a run must skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePlan {
    /// Process every row.
    FromStart,
    /// Sorted input: skip rows whose sku is `<=` the checkpoint.
    AfterSku(String),
    /// Unsorted input: skip rows at positions `<= index` (0-based).
    AfterPosition { sku: String, index: usize },
}

impl ResumePlan {
    /// Derive the plan from a stored checkpoint, validating the ordering the
    /// value comparison relies on.
    pub fn build(dataset: &Dataset, checkpoint: Option<&str>) -> Result<Self, ResumeError> {
        let Some(sku) = checkpoint else {
            return Ok(ResumePlan::FromStart);
        };
        if dataset.is_sorted_by_sku() {
            info!(checkpoint = sku, "resuming after checkpoint sku");
            return Ok(ResumePlan::AfterSku(sku.to_string()));
        }
        match dataset.last_position_of(sku) {
            Some(index) => {
                warn!(
                    checkpoint = sku,
                    row = index + 1,
                    "dataset is not sorted by sku; resuming by row position"
                );
                Ok(ResumePlan::AfterPosition {
                    sku: sku.to_string(),
                    index,
                })
            }
            None => Err(ResumeError::Unplaceable(sku.to_string())),
        }
    }

    /// True when the row at `index` with `sku` was handled by a previous run.
    pub fn covers(&self, index: usize, sku: &str) -> bool {
        match self {
            ResumePlan::FromStart => false,
            ResumePlan::AfterSku(last) => sku <= last.as_str(),
            ResumePlan::AfterPosition { index: last, .. } => index <= *last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ProductRecord;

    fn ds(skus: &[&str]) -> Dataset {
        Dataset::from_records(skus.iter().map(|s| ProductRecord::new(s, s, None)).collect())
    }

    #[test]
    fn file_checkpoint_round_trip_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpoint::new(dir.path().join("last_sku.txt"));
        assert_eq!(store.load().unwrap(), None);

        store.save("A1").unwrap();
        store.save("A2").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("A2"));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "A2");

        assert!(store.reset().unwrap());
        assert!(!store.reset().unwrap());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_replaces_value_without_leaving_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_sku.txt");
        let mut store = FileCheckpoint::new(&path);
        store.save("A1").unwrap();
        // leftover from a save that was killed before its rename
        fs::write(dir.path().join("last_sku.txt.tmp"), "").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("A1"));

        store.save("A2").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("A2"));
        assert!(!dir.path().join("last_sku.txt.tmp").exists());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("last_sku.txt")]);
    }

    #[test]
    fn whitespace_only_checkpoint_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_sku.txt");
        fs::write(&path, " \n").unwrap();
        assert_eq!(FileCheckpoint::new(&path).load().unwrap(), None);
        fs::write(&path, "A5\n").unwrap();
        assert_eq!(FileCheckpoint::new(&path).load().unwrap().as_deref(), Some("A5"));
    }

    #[test]
    fn sorted_dataset_resumes_by_value() {
        let d = ds(&["A1", "A3", "A5", "A7"]);
        let plan = ResumePlan::build(&d, Some("A5")).unwrap();
        assert_eq!(plan, ResumePlan::AfterSku("A5".into()));
        let covered: Vec<bool> = d
            .records()
            .iter()
            .enumerate()
            .map(|(i, r)| plan.covers(i, &r.sku))
            .collect();
        assert_eq!(covered, vec![true, true, true, false]);
    }

    #[test]
    fn sorted_dataset_accepts_checkpoint_not_in_data() {
        let d = ds(&["A1", "A3", "A7"]);
        let plan = ResumePlan::build(&d, Some("A5")).unwrap();
        assert!(plan.covers(1, "A3"));
        assert!(!plan.covers(2, "A7"));
    }

    #[test]
    fn unsorted_dataset_resumes_by_position() {
        let d = ds(&["B2", "A9", "C1", "A1"]);
        let plan = ResumePlan::build(&d, Some("A9")).unwrap();
        assert_eq!(
            plan,
            ResumePlan::AfterPosition {
                sku: "A9".into(),
                index: 1
            }
        );
        assert!(plan.covers(0, "B2"));
        assert!(plan.covers(1, "A9"));
        assert!(!plan.covers(2, "C1"));
        // lexicographically smaller, but after the checkpoint row
        assert!(!plan.covers(3, "A1"));
    }

    #[test]
    fn unsorted_dataset_rejects_unknown_checkpoint() {
        let d = ds(&["B2", "A9"]);
        assert_eq!(
            ResumePlan::build(&d, Some("Z1")).unwrap_err(),
            ResumeError::Unplaceable("Z1".into())
        );
    }

    #[test]
    fn no_checkpoint_processes_everything() {
        let d = ds(&["B2", "A9"]);
        let plan = ResumePlan::build(&d, None).unwrap();
        assert!(!plan.covers(0, "B2"));
        assert!(!plan.covers(1, "A9"));
    }
}
