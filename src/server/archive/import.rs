//! Zip import
//!
//! Extracts into the job's working directory, picks the archive root and
//! merges it into the destination with overwrite-on-conflict.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::server::archive::ArchiveJob;
use crate::server::context::AppError;
use crate::server::file_api::merge_copy;

/// How the single top-level folder of an archive is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPolicy {
    /// Exactly one top-level entry, and it is a directory
    SingleFolder,
    /// Same, but hidden top-level entries are not counted. Used for
    /// repository snapshots.
    SingleVisibleFolder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Name of the stripped top-level folder, if one was detected
    pub root_folder: Option<String>,
    pub files: usize,
}

/// Return the archive root inside `dir`, if the top level consists of a
/// single directory and nothing else.
pub fn detect_root_folder(dir: &Path, policy: RootPolicy) -> Result<Option<PathBuf>, AppError> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| AppError::from_io(e, dir))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if policy == RootPolicy::SingleVisibleFolder && name.starts_with('.') {
            continue;
        }
        candidates.push(entry);
    }

    if candidates.len() != 1 {
        return Ok(None);
    }
    let only = &candidates[0];
    if only.file_type()?.is_dir() {
        Ok(Some(only.path()))
    } else {
        Ok(None)
    }
}

/// Extract `zip_path` and merge its contents into `destination`.
pub fn import_zip(
    zip_path: &Path,
    destination: &Path,
    policy: RootPolicy,
) -> Result<ImportOutcome, AppError> {
    let job = ArchiveJob::new(zip_path, destination)?;
    let extracted = job.work_dir().join("extracted");
    fs::create_dir_all(&extracted)?;

    info!(
        zip = %zip_path.display(),
        destination = %destination.display(),
        "Importing zip"
    );

    let file = File::open(zip_path).map_err(|e| AppError::from_io(e, zip_path))?;
    let mut archive = ZipArchive::new(file)?;
    archive.extract(&extracted)?;
    debug!("Extracted {} entries to {:?}", archive.len(), extracted);

    let root = detect_root_folder(&extracted, policy)?;
    let source = root.clone().unwrap_or_else(|| extracted.clone());
    let files = WalkDir::new(&source)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count();

    fs::create_dir_all(destination).map_err(|e| AppError::from_io(e, destination))?;
    for entry in fs::read_dir(&source)? {
        let entry = entry?;
        merge_copy(&entry.path(), &destination.join(entry.file_name()))?;
    }

    let root_folder = root.and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()));
    info!(?root_folder, files, "Zip import finished");

    // `job` drops here and takes the extraction directory with it
    Ok(ImportOutcome { root_folder, files })
}
