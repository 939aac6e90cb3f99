//! Report archival.
//!
//! A final report is written once, keyed by its run id, and never touched
//! again. Where reports live is up to the [`ReportArchive`] implementation.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use concord_core::FinalReport;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive I/O failed: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to encode report: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Report {0} is already archived")]
    AlreadyArchived(Uuid),
}

/// Stores finished reports.
#[async_trait]
pub trait ReportArchive: Send + Sync {
    async fn store(&self, report: &FinalReport) -> Result<(), ArchiveError>;
}

/// Writes each report to `<dir>/<run_id>.json`.
///
/// The file is written under a unique staging name and hard-linked into
/// place, so a reader never sees a partial report and two writers of the
/// same run cannot both succeed. The staging file is removed either way.
#[derive(Debug, Clone)]
pub struct FileArchive {
    dir: PathBuf,
}

impl FileArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    pub async fn load(&self, run_id: Uuid) -> Result<FinalReport, ArchiveError> {
        let bytes = tokio::fs::read(self.path_for(run_id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ReportArchive for FileArchive {
    async fn store(&self, report: &FinalReport) -> Result<(), ArchiveError> {
        let target = self.path_for(report.run_id);
        let bytes = serde_json::to_vec_pretty(report)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let staging = self
            .dir
            .join(format!(".{}.{}.json.tmp", report.run_id, Uuid::new_v4()));
        let published = publish(&staging, &target, &bytes).await;
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
            }
        }

        match published {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::AlreadyArchived(report.run_id));
            }
            other => other?,
        }
        tracing::debug!(run_id = %report.run_id, path = %target.display(), "Report archived");
        Ok(())
    }
}

/// Write `bytes` to `staging`, then link it to `target`. Linking fails with
/// `AlreadyExists` if the target is present, with no window in between.
async fn publish(staging: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    tokio::fs::write(staging, bytes).await?;
    tokio::fs::hard_link(staging, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{Context, RunState, RunStatus};

    fn staging_files(dir: &Path) -> Vec<std::fs::DirEntry> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path().join("reports"));
        let report = RunState::new("Assess", Context::new(), 2).finalize();

        archive.store(&report).await.unwrap();
        assert!(archive.path_for(report.run_id).exists());

        let loaded = archive.load(report.run_id).await.unwrap();
        assert_eq!(loaded, report);
        assert_eq!(loaded.status, RunStatus::Success);
        assert!(staging_files(archive.dir()).is_empty());
    }

    #[tokio::test]
    async fn test_report_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path());
        let report = RunState::new("Assess", Context::new(), 2).finalize();

        archive.store(&report).await.unwrap();
        assert!(matches!(
            archive.store(&report).await,
            Err(ArchiveError::AlreadyArchived(id)) if id == report.run_id
        ));
        assert!(staging_files(archive.dir()).is_empty());
        assert_eq!(archive.load(report.run_id).await.unwrap().run_id, report.run_id);
    }

    #[tokio::test]
    async fn test_racing_writers_store_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path());
        let report = RunState::new("Assess", Context::new(), 2).finalize();

        let (first, second) = tokio::join!(archive.store(&report), archive.store(&report));
        let stored = [first.is_ok(), second.is_ok()];
        assert_eq!(stored.iter().filter(|ok| **ok).count(), 1);
        assert!(staging_files(archive.dir()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path());
        let report = RunState::new("Assess", Context::new(), 2).finalize();

        // A directory squatting on the target makes the link fail.
        std::fs::create_dir(archive.path_for(report.run_id)).unwrap();
        assert!(archive.store(&report).await.is_err());
        assert!(staging_files(archive.dir()).is_empty());
    }
}
