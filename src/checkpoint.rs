use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Durable progress through one spreadsheet, stored as `progreso.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    #[serde(rename = "archivo")]
    pub file: PathBuf,
    /// Index of the last batch that fully executed; -1 before the first.
    #[serde(rename = "ultimo_lote")]
    pub last_batch: i64,
    #[serde(rename = "filas_procesadas")]
    pub rows_processed: usize,
    /// Pending row indices the batches were cut from.
    #[serde(rename = "filas_pendientes", default)]
    pub pending: Vec<usize>,
}

/// One slice of the pending rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub rows: Vec<usize>,
}

impl BatchProgress {
    /// Fresh plan over `pending`, nothing committed yet.
    pub fn begin(file: impl Into<PathBuf>, pending: Vec<usize>) -> Self {
        Self {
            file: file.into(),
            last_batch: -1,
            rows_processed: 0,
            pending,
        }
    }

    pub fn batch_count(&self, batch_size: usize) -> usize {
        self.pending.len().div_ceil(batch_size)
    }

    fn next_index(&self) -> usize {
        (self.last_batch + 1) as usize
    }

    /// True once every batch of the plan has been committed.
    pub fn is_exhausted(&self, batch_size: usize) -> bool {
        self.next_index() >= self.batch_count(batch_size)
    }

    /// The batch right after the last committed one.
    pub fn next_batch(&self, batch_size: usize) -> Option<Batch> {
        let index = self.next_index();
        let start = index.checked_mul(batch_size)?;
        if start >= self.pending.len() {
            return None;
        }
        let end = (start + batch_size).min(self.pending.len());
        Some(Batch {
            index,
            rows: self.pending[start..end].to_vec(),
        })
    }

    /// Record that batch `index` has fully executed.
    pub fn commit(&mut self, index: usize, rows_handled: usize) -> Result<()> {
        if index != self.next_index() {
            return Err(BotError::Config(format!(
                "batch {index} committed out of order, expected {}",
                self.next_index()
            )));
        }
        self.last_batch = index as i64;
        self.rows_processed += rows_handled;
        Ok(())
    }
}

/// File-backed storage for [`BatchProgress`].
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<BatchProgress>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, progress: &BatchProgress) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(progress)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Progress record removed");
        }
        Ok(())
    }

    /// Resume the stored plan for `file`, or start a new one over `pending_now`.
    ///
    /// A record without a `filas_pendientes` snapshot keeps its batch index
    /// and cuts its batches from `pending_now`. A record for another file, or
    /// one whose batches are all committed, is replaced by a fresh plan. The
    /// fresh plan is saved immediately.
    pub fn resume_or_begin(
        &self,
        file: &Path,
        pending_now: Vec<usize>,
        batch_size: usize,
    ) -> Result<BatchProgress> {
        let stored = self.load().map(|record| {
            record.map(|mut progress| {
                if progress.file == file && progress.pending.is_empty() {
                    progress.pending = pending_now.clone();
                }
                progress
            })
        });
        match stored {
            Ok(Some(progress)) if progress.file == file && !progress.is_exhausted(batch_size) => {
                info!(
                    last_batch = progress.last_batch,
                    rows_processed = progress.rows_processed,
                    "Resuming from progress record"
                );
                return Ok(progress);
            }
            Ok(Some(progress)) => {
                info!(
                    stored_file = %progress.file.display(),
                    last_batch = progress.last_batch,
                    "Stored progress does not apply, starting a new plan"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Unreadable progress record, starting a new plan"),
        }

        let progress = BatchProgress::begin(file, pending_now);
        self.save(&progress)?;
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_count_is_ceiling() {
        for (n, b, expected) in [(0, 5, 0), (1, 5, 1), (5, 5, 1), (6, 5, 2), (12, 5, 3), (12, 1, 12)] {
            let p = BatchProgress::begin("f.xlsx", (0..n).collect());
            assert_eq!(p.batch_count(b), expected, "n={n} b={b}");
        }
    }

    #[test]
    fn test_twelve_rows_make_three_batches() {
        let mut p = BatchProgress::begin("f.xlsx", (0..12).collect());
        let mut sizes = Vec::new();
        while let Some(batch) = p.next_batch(5) {
            sizes.push(batch.rows.len());
            p.commit(batch.index, batch.rows.len()).unwrap();
        }
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(p.last_batch, 2);
        assert_eq!(p.rows_processed, 12);
        assert!(p.is_exhausted(5));
    }

    #[test]
    fn test_resume_yields_next_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("progreso.json"));
        let file = Path::new("inputs/900_marzo.xlsx");

        let mut p = store.resume_or_begin(file, (0..12).collect(), 5).unwrap();
        assert_eq!(p.next_batch(5).unwrap().index, 0);
        p.commit(0, 5).unwrap();
        store.save(&p).unwrap();

        // The sheet now has fewer pending rows, but the stored plan wins.
        let resumed = store.resume_or_begin(file, (5..12).collect(), 5).unwrap();
        let batch = resumed.next_batch(5).unwrap();
        assert_eq!(batch.index, 1);
        assert_eq!(batch.rows, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_commit_must_be_in_order() {
        let mut p = BatchProgress::begin("f.xlsx", (0..12).collect());
        assert!(p.commit(1, 5).is_err());
        p.commit(0, 5).unwrap();
        assert!(p.commit(0, 5).is_err());
        assert_eq!(p.last_batch, 0);
    }

    #[test]
    fn test_exhausted_plan_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("progreso.json"));
        let file = Path::new("a.xlsx");
        let mut p = BatchProgress::begin(file, vec![0, 1]);
        p.commit(0, 2).unwrap();
        store.save(&p).unwrap();

        let fresh = store.resume_or_begin(file, vec![1], 5).unwrap();
        assert_eq!(fresh.last_batch, -1);
        assert_eq!(fresh.pending, vec![1]);
    }

    #[test]
    fn test_other_file_starts_over_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::new(dir.path().join("progreso.json"));
        store.save(&BatchProgress::begin("a.xlsx", vec![0, 1, 2])).unwrap();

        let p = store.resume_or_begin(Path::new("b.xlsx"), vec![4], 5).unwrap();
        assert_eq!(p.file, PathBuf::from("b.xlsx"));
        assert_eq!(store.load().unwrap().unwrap().file, PathBuf::from("b.xlsx"));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_reads_record_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progreso.json");
        fs::write(&path, r#"{"archivo": "a.xlsx", "ultimo_lote": 0, "filas_procesadas": 5}"#).unwrap();
        let p = ProgressStore::new(&path).load().unwrap().unwrap();
        assert_eq!(p.last_batch, 0);
        assert!(p.pending.is_empty());
    }

    #[test]
    fn test_record_without_snapshot_resumes_after_last_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progreso.json");
        fs::write(&path, r#"{"archivo": "a.xlsx", "ultimo_lote": 0, "filas_procesadas": 5}"#).unwrap();
        let store = ProgressStore::new(&path);

        let p = store.resume_or_begin(Path::new("a.xlsx"), (0..12).collect(), 5).unwrap();
        assert_eq!(p.last_batch, 0);
        assert_eq!(p.rows_processed, 5);
        let batch = p.next_batch(5).unwrap();
        assert_eq!(batch.index, 1);
        assert_eq!(batch.rows, vec![5, 6, 7, 8, 9]);
    }
}
