//! Directory listing
//!
//! Reads one directory, stats every child and orders the result so that
//! recently touched folders surface first. A folder's timestamp is the
//! newest modification time found anywhere beneath it.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};

use crate::server::context::AppError;
use crate::server::icons::{self, FileKind};

/// One file or directory in a listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub full_path: String,
    pub is_directory: bool,
    /// `None` for directories, rendered as `"n/a"`
    #[serde(serialize_with = "serialize_size")]
    pub size_bytes: Option<u64>,
    pub is_hidden: bool,
    /// Lowercased extension, `"folder"` for directories
    pub extension: String,
    pub kind: FileKind,
    pub icon_class: &'static str,
    pub last_modified: DateTime<Utc>,
}

fn serialize_size<S: Serializer>(size: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
    match size {
        Some(bytes) => s.serialize_u64(*bytes),
        None => s.serialize_str("n/a"),
    }
}

/// Ordered entries of one directory plus breadcrumb data
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResult {
    pub path: String,
    pub parent_path: String,
    pub segments: Vec<String>,
    pub entries: Vec<DirectoryEntry>,
}

/// Listing order: directories first, hidden last, newest first, then name.
pub fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.is_hidden.cmp(&b.is_hidden))
        .then_with(|| b.last_modified.cmp(&a.last_modified))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// List `dir`. Fails with `NotFound` / `PermissionDenied` for the directory
/// itself and `InvalidInput` when it is a file; children that vanish
/// mid-listing are dropped.
pub fn list_directory(dir: &Path) -> Result<ListingResult, AppError> {
    debug!("Listing directory: {:?}", dir);

    let metadata = fs::metadata(dir).map_err(|e| AppError::from_io(e, dir))?;
    if !metadata.is_dir() {
        return Err(AppError::InvalidInput(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }
    let read_dir = fs::read_dir(dir).map_err(|e| AppError::from_io(e, dir))?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                trace!("Skipping unreadable entry in {:?}: {}", dir, e);
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        // Follows symlinks; a dangling link or a concurrent delete lands here
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                trace!("Dropping {:?} from listing: {}", path, e);
                continue;
            }
        };

        let is_directory = metadata.is_dir();
        let modified = if is_directory {
            folder_mtime(&path)
        } else {
            metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
        };
        let kind = icons::classify(&name, is_directory);

        entries.push(DirectoryEntry {
            full_path: path.to_string_lossy().to_string(),
            is_directory,
            size_bytes: if is_directory { None } else { Some(metadata.len()) },
            is_hidden: name.starts_with('.'),
            extension: if is_directory {
                "folder".to_string()
            } else {
                icons::extension_of(&name).unwrap_or_default()
            },
            kind,
            icon_class: kind.icon_class(),
            last_modified: DateTime::<Utc>::from(modified),
            name,
        });
    }

    entries.sort_by(compare_entries);

    Ok(ListingResult {
        path: dir.to_string_lossy().to_string(),
        parent_path: dir
            .parent()
            .unwrap_or(dir)
            .to_string_lossy()
            .to_string(),
        segments: path_segments(dir),
        entries,
    })
}

/// Non-empty path components for breadcrumb display.
pub fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect()
}

/// Newest modification time of `dir` and everything beneath it.
/// Unreadable descendants are ignored; symlink cycles are cut by tracking
/// visited canonical directories.
pub fn folder_mtime(dir: &Path) -> SystemTime {
    let mut visited = HashSet::new();
    folder_mtime_inner(dir, &mut visited)
}

fn folder_mtime_inner(dir: &Path, visited: &mut HashSet<PathBuf>) -> SystemTime {
    let own = match fs::metadata(dir).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return SystemTime::UNIX_EPOCH,
    };

    match dir.canonicalize() {
        Ok(canonical) => {
            if !visited.insert(canonical) {
                return own;
            }
        }
        Err(_) => return own,
    }

    let children = match fs::read_dir(dir) {
        Ok(c) => c,
        Err(_) => return own,
    };

    let mut latest = own;
    for child in children.flatten() {
        let path = child.path();
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let candidate = if metadata.is_dir() {
            folder_mtime_inner(&path, visited)
        } else {
            match metadata.modified() {
                Ok(t) => t,
                Err(_) => continue,
            }
        };
        if candidate > latest {
            latest = candidate;
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn names(result: &ListingResult) -> Vec<&str> {
        result.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_project_scenario_order() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let old = SystemTime::now() - Duration::from_secs(3600);

        fs::write(root.join("a.txt"), "hi").unwrap();
        fs::write(root.join(".env"), "KEY=1").unwrap();
        fs::create_dir(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        set_mtime(&root.join("a.txt"), old);
        set_mtime(&root.join(".env"), SystemTime::now());

        let result = list_directory(root).unwrap();
        assert_eq!(names(&result), vec!["src", "a.txt", ".env"]);

        let src = &result.entries[0];
        assert!(src.is_directory);
        assert_eq!(src.size_bytes, None);
        assert_eq!(src.extension, "folder");
        let a = &result.entries[1];
        assert_eq!(a.size_bytes, Some(2));
        assert_eq!(a.extension, "txt");
        assert!(result.entries[2].is_hidden);
    }

    #[test]
    fn test_recent_descendant_lifts_folder() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let future = SystemTime::now() + Duration::from_secs(3600);

        fs::create_dir_all(root.join("alpha")).unwrap();
        fs::create_dir_all(root.join("zeta/deep/er")).unwrap();
        fs::write(root.join("zeta/deep/er/x.txt"), "x").unwrap();
        set_mtime(&root.join("zeta/deep/er/x.txt"), future);

        let result = list_directory(root).unwrap();
        assert_eq!(names(&result), vec!["zeta", "alpha"]);
        assert!(result.entries[0].last_modified > result.entries[1].last_modified);
    }

    #[test]
    fn test_equal_mtimes_break_ties_by_name() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let t = SystemTime::now() - Duration::from_secs(60);
        for name in ["b.txt", "C.txt", "a.txt"] {
            fs::write(root.join(name), name).unwrap();
            set_mtime(&root.join(name), t);
        }

        let first = list_directory(root).unwrap();
        assert_eq!(names(&first), vec!["a.txt", "b.txt", "C.txt"]);

        // Determinism: re-listing yields the same order
        let second = list_directory(root).unwrap();
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn test_pairwise_order_holds() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join(".cache")).unwrap();
        fs::create_dir(root.join("lib")).unwrap();
        fs::write(root.join("z.txt"), "").unwrap();
        fs::write(root.join(".hidden"), "").unwrap();
        fs::write(root.join("b.md"), "").unwrap();

        let result = list_directory(root).unwrap();
        for pair in result.entries.windows(2) {
            assert_ne!(compare_entries(&pair[0], &pair[1]), Ordering::Greater);
        }
        assert_eq!(result.entries[0].name, "lib");
        assert_eq!(result.entries[1].name, ".cache");
    }

    #[test]
    fn test_empty_and_missing_directories() {
        let temp = TempDir::new().unwrap();
        let result = list_directory(temp.path()).unwrap();
        assert!(result.entries.is_empty());

        assert!(matches!(
            list_directory(&temp.path().join("missing")),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_listing_a_file_is_invalid_input() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("notes.txt"), "x").unwrap();

        let err = list_directory(&temp.path().join("notes.txt")).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_breadcrumbs() {
        let result_segments = path_segments(Path::new("/home/user/proj"));
        assert_eq!(result_segments, vec!["home", "user", "proj"]);

        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("child")).unwrap();
        let result = list_directory(&temp.path().join("child")).unwrap();
        assert_eq!(result.parent_path, temp.path().to_string_lossy());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("dir")).unwrap();
        std::os::unix::fs::symlink(root.join("dir"), root.join("dir/loop")).unwrap();

        let result = list_directory(root).unwrap();
        assert_eq!(names(&result), vec!["dir"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_dropped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(root.join("gone"), root.join("dangling")).unwrap();

        let result = list_directory(root).unwrap();
        assert_eq!(names(&result), vec!["real.txt"]);
    }

    #[test]
    fn test_size_serializes_as_na_for_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("d")).unwrap();
        let result = list_directory(temp.path()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["entries"][0]["sizeBytes"], "n/a");
        assert_eq!(json["entries"][0]["isDirectory"], true);
        assert_eq!(json["entries"][0]["kind"], "folder");
    }
}
