//! Zip export
//!
//! The archive is written to a file inside the job's working directory and
//! only then handed to the caller, so a walk error surfaces as an error
//! response and never as a truncated download.

use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::server::archive::ignore::IgnoreRules;
use crate::server::context::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
    /// Size of the finished archive
    pub bytes: u64,
}

/// Zip the contents of `source` (not the folder itself) into `output`.
pub fn export_directory(
    source: &Path,
    output: &Path,
    rules: &IgnoreRules,
) -> Result<ExportStats, AppError> {
    let metadata = fs::metadata(source).map_err(|e| AppError::from_io(e, source))?;
    if !metadata.is_dir() {
        return Err(AppError::InvalidInput(format!(
            "'{}' is not a directory",
            source.display()
        )));
    }

    info!(source = %source.display(), output = %output.display(), "Exporting directory");
    write_archive(output, |zip, stats, skip| {
        add_tree(zip, source, "", rules, stats, skip)
    })
}

/// Zip several files or folders, each stored under its own base name.
pub fn export_entries(
    sources: &[PathBuf],
    output: &Path,
    rules: &IgnoreRules,
) -> Result<ExportStats, AppError> {
    if sources.is_empty() {
        return Err(AppError::InvalidInput("No paths selected".to_string()));
    }

    info!(count = sources.len(), output = %output.display(), "Exporting selection");
    write_archive(output, |zip, stats, skip| {
        for source in sources {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    AppError::InvalidInput(format!("'{}' has no file name", source.display()))
                })?;
            if rules.is_ignored(&name) {
                stats.skipped += 1;
                continue;
            }

            let metadata = fs::metadata(source).map_err(|e| AppError::from_io(e, source))?;
            if metadata.is_dir() {
                zip.add_directory(format!("{}/", name), options())?;
                stats.directories += 1;
                add_tree(zip, source, &name, rules, stats, skip)?;
            } else {
                add_file(zip, source, &name, metadata.len())?;
                stats.files += 1;
            }
        }
        Ok(())
    })
}

fn write_archive<F>(output: &Path, fill: F) -> Result<ExportStats, AppError>
where
    F: FnOnce(
        &mut ZipWriter<BufWriter<File>>,
        &mut ExportStats,
        Option<&Path>,
    ) -> Result<(), AppError>,
{
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::from_io(e, parent))?;
    }
    let file = File::create(output).map_err(|e| AppError::from_io(e, output))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let mut stats = ExportStats::default();
    // The archive may sit inside the tree being walked
    let own_path = output.canonicalize().ok();

    let result = fill(&mut zip, &mut stats, own_path.as_deref()).and_then(|_| {
        let mut inner = zip.finish()?;
        inner.flush()?;
        Ok(())
    });

    if let Err(e) = result {
        let _ = fs::remove_file(output);
        return Err(e);
    }

    stats.bytes = fs::metadata(output)
        .map_err(|e| AppError::from_io(e, output))?
        .len();
    debug!(?stats, "Archive written");
    Ok(stats)
}

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Archive name for `relative` under `prefix`, always `/`-separated.
fn archive_name(prefix: &str, relative: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    for component in relative.components() {
        if let Component::Normal(s) = component {
            parts.push(s.to_string_lossy().to_string());
        }
    }
    parts.join("/")
}

fn add_tree<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    prefix: &str,
    rules: &IgnoreRules,
    stats: &mut ExportStats,
    skip: Option<&Path>,
) -> Result<(), AppError> {
    let relative_name = |path: &Path| {
        archive_name(prefix, path.strip_prefix(root).unwrap_or(path))
    };
    let skip_relative = match (skip, root.canonicalize()) {
        (Some(skip), Ok(canonical_root)) => skip
            .strip_prefix(&canonical_root)
            .ok()
            .map(Path::to_path_buf),
        _ => None,
    };
    let is_own_archive = |path: &Path| {
        skip_relative.as_deref().is_some_and(|rel| path.strip_prefix(root).ok() == Some(rel))
    };

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !is_own_archive(entry.path()) && !rules.is_ignored(&relative_name(entry.path()))
        });

    for entry in walker {
        let entry = entry?;
        let name = relative_name(entry.path());
        let file_type = entry.file_type();

        if file_type.is_dir() {
            zip.add_directory(format!("{}/", name), options())?;
            stats.directories += 1;
        } else if file_type.is_file() {
            let len = entry.metadata()?.len();
            add_file(zip, entry.path(), &name, len)?;
            stats.files += 1;
        } else {
            // Symlinks: include regular-file targets, skip everything else
            match fs::metadata(entry.path()) {
                Ok(m) if m.is_file() => {
                    add_file(zip, entry.path(), &name, m.len())?;
                    stats.files += 1;
                }
                _ => {
                    debug!("Skipping non-regular entry {:?}", entry.path());
                    stats.skipped += 1;
                }
            }
        }
    }
    Ok(())
}

fn add_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    path: &Path,
    name: &str,
    len: u64,
) -> Result<(), AppError> {
    let mut file = File::open(path).map_err(|e| AppError::from_io(e, path))?;
    zip.start_file(name, options().large_file(len >= u32::MAX as u64))?;
    io::copy(&mut file, zip).map_err(|e| AppError::from_io(e, path))?;
    Ok(())
}
