//! Zip export/import
//!
//! Every export or import runs as an [`ArchiveJob`] that owns a private
//! temporary working directory. The directory is removed when the job is
//! dropped, on success and on failure alike.

pub mod export;
pub mod ignore;
pub mod import;
pub mod remote;

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::server::context::AppError;

pub use export::{export_directory, export_entries, ExportStats};
pub use ignore::IgnoreRules;
pub use import::{detect_root_folder, import_zip, ImportOutcome, RootPolicy};
pub use remote::{import_repository, ArchiveFetcher, HttpFetcher};

/// One export or import operation and its temporary working state
#[derive(Debug)]
pub struct ArchiveJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    work_dir: TempDir,
}

impl ArchiveJob {
    /// Create a job with a fresh working directory under the system temp root.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<Self, AppError> {
        let work_dir = tempfile::Builder::new()
            .prefix("filedeck-job-")
            .tempdir()
            .map_err(|e| AppError::Io(format!("Failed to create temp directory: {}", e)))?;
        let job = Self {
            source: source.into(),
            destination: destination.into(),
            work_dir,
        };
        debug!(
            source = %job.source.display(),
            destination = %job.destination.display(),
            work_dir = %job.work_dir.path().display(),
            "Archive job created"
        );
        Ok(job)
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Hand the working directory over to whoever outlives the job,
    /// e.g. a response body that streams a file out of it.
    pub fn into_work_dir(self) -> TempDir {
        self.work_dir
    }
}

/// Archive file name for a folder: `<basename>.zip`, `all-files.zip` for `/`.
pub fn zip_name_for(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "all-files".to_string());
    format!("{}.zip", base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_work_dir_is_removed_on_drop() {
        let job = ArchiveJob::new("/src", "/dst").unwrap();
        let dir = job.work_dir().to_path_buf();
        std::fs::write(dir.join("scratch"), "x").unwrap();
        assert!(dir.exists());

        drop(job);
        assert!(!dir.exists());
    }

    #[test]
    fn zip_names() {
        assert_eq!(zip_name_for(Path::new("/home/me/proj")), "proj.zip");
        assert_eq!(zip_name_for(Path::new("/")), "all-files.zip");
    }
}
