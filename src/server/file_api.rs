//! File API for single-entry file operations
//!
//! Path resolution, read/write, create, delete, rename, copy and move.
//! All functions are blocking; async callers wrap them in `spawn_blocking`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::server::context::AppError;

/// Maximum path length
pub const MAX_PATH_LENGTH: usize = 4096;

/// Resolves request paths, optionally confined to a sandbox root.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    root_dir: PathBuf,
    sandbox_root: Option<PathBuf>,
}

impl PathPolicy {
    pub fn new(root_dir: PathBuf, sandbox_root: Option<PathBuf>) -> Self {
        Self {
            root_dir,
            sandbox_root,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Resolve a possibly-missing request path, falling back to the root dir.
    pub fn resolve_or_root(&self, raw: Option<&str>) -> Result<PathBuf, AppError> {
        match raw {
            Some(p) if !p.trim().is_empty() => self.resolve(p),
            _ => self.resolve(&self.root_dir.to_string_lossy()),
        }
    }

    /// Validate and resolve a request path.
    ///
    /// Relative paths are joined onto the root dir. Without a sandbox any
    /// path is accepted as-is; with one, the normalized path must stay under it.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, AppError> {
        if raw.trim().is_empty() {
            return Err(AppError::InvalidInput("Path is required".to_string()));
        }
        if raw.len() > MAX_PATH_LENGTH {
            return Err(AppError::InvalidInput(
                "Path exceeds maximum length".to_string(),
            ));
        }
        if raw.contains('\0') {
            return Err(AppError::InvalidInput("Path contains NUL byte".to_string()));
        }

        let requested = Path::new(raw);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root_dir.join(requested)
        };

        match &self.sandbox_root {
            None => Ok(joined),
            Some(sandbox) => resolve_safe_path(sandbox, &joined),
        }
    }
}

/// Lexically normalize `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Verify `path` stays under `sandbox` and return the resolved path.
/// Existing paths are canonicalized so symlinks cannot point outside.
fn resolve_safe_path(sandbox: &Path, path: &Path) -> Result<PathBuf, AppError> {
    let normalized = normalize_path(path);
    let sandbox_norm = normalize_path(sandbox);
    let escape = || {
        AppError::PermissionDenied(format!(
            "Path '{}' is outside the sandbox root",
            path.display()
        ))
    };

    if !normalized.starts_with(&sandbox_norm) {
        warn!("Path escape attempt: {:?} not under {:?}", normalized, sandbox_norm);
        return Err(escape());
    }

    let root_canonical = sandbox
        .canonicalize()
        .map_err(|e| AppError::from_io(e, sandbox))?;

    if normalized.exists() {
        let canonical = normalized
            .canonicalize()
            .map_err(|e| AppError::from_io(e, &normalized))?;
        if !canonical.starts_with(&root_canonical) {
            warn!("Symlink escape attempt: {:?} not under {:?}", canonical, root_canonical);
            return Err(escape());
        }
        Ok(canonical)
    } else {
        // For non-existent paths (create/write), check the parent instead
        if let Some(parent) = normalized.parent() {
            if parent.exists() {
                let parent_canonical = parent
                    .canonicalize()
                    .map_err(|e| AppError::from_io(e, parent))?;
                if !parent_canonical.starts_with(&root_canonical) {
                    return Err(escape());
                }
            }
        }
        Ok(normalized)
    }
}

/// 验证文件名是否有效
pub fn validate_filename(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidInput("Name is required".to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(AppError::InvalidInput(
            "Name must not contain path separators".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(AppError::InvalidInput("Name must not be . or ..".to_string()));
    }
    if name.contains('\0') {
        return Err(AppError::InvalidInput("Name must not contain NUL".to_string()));
    }
    Ok(())
}

/// Read file content as UTF-8 string
pub fn read_file(path: &Path, max_bytes: u64) -> Result<String, AppError> {
    debug!("Reading file: {:?}", path);

    let metadata = fs::metadata(path).map_err(|e| AppError::from_io(e, path))?;
    if metadata.is_dir() {
        return Err(AppError::InvalidInput(format!(
            "'{}' is a directory",
            path.display()
        )));
    }
    if metadata.len() > max_bytes {
        return Err(AppError::InvalidInput(format!(
            "File exceeds the {} byte read limit",
            max_bytes
        )));
    }

    let mut file = fs::File::open(path).map_err(|e| AppError::from_io(e, path))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;

    String::from_utf8(content)
        .map_err(|_| AppError::InvalidInput("File is not valid UTF-8".to_string()))
}

/// Write file content atomically, returns bytes written
pub fn write_file(path: &Path, content: &str) -> Result<u64, AppError> {
    debug!("Writing file: {:?}", path);

    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::InvalidInput("File path has no name".to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::from_io(e, parent))?;
    }

    // Write to a sibling temp file first, then rename over the target
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".filedeck-tmp");
    let temp_path = path.with_file_name(temp_name);
    {
        let mut temp_file =
            fs::File::create(&temp_path).map_err(|e| AppError::from_io(e, &temp_path))?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(AppError::from_io(e, path));
    }

    Ok(content.len() as u64)
}

/// Kind of entry created by `create_entry`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewEntryKind {
    File,
    Folder,
}

/// Create an empty file or a folder named `name` inside `parent`.
pub fn create_entry(parent: &Path, name: &str, kind: NewEntryKind) -> Result<PathBuf, AppError> {
    validate_filename(name)?;
    let target = parent.join(name);

    if fs::symlink_metadata(&target).is_ok() {
        return Err(AppError::AlreadyExists(format!(
            "'{}' already exists",
            target.display()
        )));
    }

    match kind {
        NewEntryKind::Folder => fs::create_dir_all(&target),
        NewEntryKind::File => fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map(|_| ()),
    }
    .map_err(|e| AppError::from_io(e, &target))?;

    debug!("Created {:?} {:?}", kind, target);
    Ok(target)
}

/// Delete a file or directory (recursively).
pub fn delete_entry(path: &Path) -> Result<(), AppError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| AppError::from_io(e, path))?;

    debug!("Deleting: {:?}", path);
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .map_err(|e| AppError::from_io(e, path))
}

/// Delete every path, continuing past failures.
/// Returns the number deleted, or the first error together with the failure count.
pub fn delete_entries(paths: &[PathBuf]) -> Result<usize, AppError> {
    let mut deleted = 0;
    let mut first_error: Option<AppError> = None;
    let mut failures = 0;

    for path in paths {
        match delete_entry(path) {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!("Failed to delete {:?}: {}", path, e);
                failures += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        None => Ok(deleted),
        Some(e) if failures == 1 && paths.len() == 1 => Err(e),
        Some(e) => Err(AppError::Io(format!(
            "Failed to delete {} of {} items: {}",
            failures,
            paths.len(),
            e
        ))),
    }
}

/// Rename a file or directory within its parent. Returns the new path.
///
/// Renaming onto an existing name fails; nothing is overwritten.
pub fn rename_entry(old_path: &Path, new_name: &str) -> Result<PathBuf, AppError> {
    validate_filename(new_name)?;

    if fs::symlink_metadata(old_path).is_err() {
        return Err(AppError::NotFound(format!(
            "Path not found: {}",
            old_path.display()
        )));
    }

    let parent = old_path
        .parent()
        .ok_or_else(|| AppError::InvalidInput("Cannot rename the filesystem root".to_string()))?;
    let new_path = parent.join(new_name);

    if new_path == old_path {
        return Ok(new_path);
    }
    if fs::symlink_metadata(&new_path).is_ok() {
        return Err(AppError::AlreadyExists(format!(
            "'{}' already exists",
            new_path.display()
        )));
    }

    debug!("Renaming {:?} to {:?}", old_path, new_path);
    fs::rename(old_path, &new_path).map_err(|e| AppError::from_io(e, old_path))?;

    Ok(new_path)
}

/// Recursively copy `src` onto `dst`, merging directories and
/// overwriting files that already exist at the same relative path.
pub fn merge_copy(src: &Path, dst: &Path) -> Result<(), AppError> {
    let metadata = fs::metadata(src).map_err(|e| AppError::from_io(e, src))?;

    if !metadata.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| AppError::from_io(e, parent))?;
        }
        fs::copy(src, dst).map_err(|e| AppError::from_io(e, src))?;
        return Ok(());
    }

    fs::create_dir_all(dst).map_err(|e| AppError::from_io(e, dst))?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| AppError::from_io(e, &target))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| AppError::from_io(e, entry.path()))?;
        } else if file_type.is_symlink() {
            // Copy what the link points at when it is a regular file, skip the rest
            match fs::metadata(entry.path()) {
                Ok(m) if m.is_file() => {
                    fs::copy(entry.path(), &target)
                        .map_err(|e| AppError::from_io(e, entry.path()))?;
                }
                _ => debug!("Skipping symlink {:?}", entry.path()),
            }
        }
    }
    Ok(())
}

fn destination_for(source: &Path, dest_dir: &Path) -> Result<PathBuf, AppError> {
    let name = source.file_name().ok_or_else(|| {
        AppError::InvalidInput(format!("'{}' has no file name", source.display()))
    })?;
    Ok(dest_dir.join(name))
}

fn ensure_not_into_self(source: &Path, target: &Path) -> Result<(), AppError> {
    let source_norm = source.canonicalize().unwrap_or_else(|_| normalize_path(source));
    let target_parent = target.parent().unwrap_or(target);
    let target_norm = target_parent
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(target_parent));

    if target_norm.starts_with(&source_norm) {
        return Err(AppError::InvalidInput(format!(
            "Cannot place '{}' inside itself",
            source.display()
        )));
    }
    Ok(())
}

/// Copying an entry onto itself would truncate it through `fs::copy`.
fn ensure_distinct(source: &Path, target: &Path) -> Result<(), AppError> {
    let same = match (source.canonicalize(), target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => normalize_path(source) == normalize_path(target),
    };
    if same {
        return Err(AppError::InvalidInput(format!(
            "Source and destination are the same: '{}'",
            source.display()
        )));
    }
    Ok(())
}

fn ensure_dest_dir(dest_dir: &Path) -> Result<(), AppError> {
    match fs::metadata(dest_dir) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(AppError::InvalidInput(format!(
            "'{}' is not a directory",
            dest_dir.display()
        ))),
        Err(e) => Err(AppError::from_io(e, dest_dir)),
    }
}

/// Copy each source into `dest_dir/<basename>` with overwrite-on-conflict.
pub fn copy_entries(sources: &[PathBuf], dest_dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    ensure_dest_dir(dest_dir)?;

    let mut copied = Vec::with_capacity(sources.len());
    for source in sources {
        let target = destination_for(source, dest_dir)?;
        ensure_distinct(source, &target)?;
        if fs::metadata(source).map(|m| m.is_dir()).unwrap_or(false) {
            ensure_not_into_self(source, &target)?;
        }
        debug!("Copying {:?} to {:?}", source, target);
        merge_copy(source, &target)?;
        copied.push(target);
    }
    Ok(copied)
}

/// Move each source into `dest_dir`. Existing targets are not overwritten.
pub fn move_entries(sources: &[PathBuf], dest_dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    ensure_dest_dir(dest_dir)?;

    let mut moved = Vec::with_capacity(sources.len());
    for source in sources {
        if fs::symlink_metadata(source).is_err() {
            return Err(AppError::NotFound(format!(
                "Path not found: {}",
                source.display()
            )));
        }
        let target = destination_for(source, dest_dir)?;
        if target == *source {
            moved.push(target);
            continue;
        }
        ensure_not_into_self(source, &target)?;
        if fs::symlink_metadata(&target).is_ok() {
            return Err(AppError::AlreadyExists(format!(
                "'{}' already exists",
                target.display()
            )));
        }

        debug!("Moving {:?} to {:?}", source, target);
        if let Err(e) = fs::rename(source, &target) {
            // Different filesystems: fall back to copy + remove
            debug!("rename failed ({}), copying instead", e);
            merge_copy(source, &target)?;
            delete_entry(source)?;
        }
        moved.push(target);
    }
    Ok(moved)
}

/// Target path for an uploaded file: only the base name of the client's
/// file name is kept.
pub fn upload_target(dir: &Path, client_name: &str) -> Result<PathBuf, AppError> {
    let base = Path::new(client_name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_default();
    validate_filename(&base)?;
    Ok(dir.join(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_escape_prevention() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("dir")).unwrap();
        let policy = PathPolicy::new(root.clone(), Some(root.clone()));

        // Valid paths
        assert!(policy.resolve("file.txt").is_ok());
        assert!(policy.resolve("dir/file.txt").is_ok());
        assert!(policy.resolve("./file.txt").is_ok());
        assert!(policy.resolve("dir/../file.txt").is_ok());
        assert!(policy.resolve(&root.join("dir").to_string_lossy()).is_ok());

        // Invalid paths (escape attempts)
        assert!(matches!(
            policy.resolve("../file.txt"),
            Err(AppError::PermissionDenied(_))
        ));
        assert!(matches!(
            policy.resolve("dir/../../file.txt"),
            Err(AppError::PermissionDenied(_))
        ));
        assert!(matches!(
            policy.resolve("/etc/passwd"),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_prevention() {
        let outside = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        let policy = PathPolicy::new(root.clone(), Some(root));

        assert!(matches!(
            policy.resolve("link"),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_no_sandbox_accepts_any_path() {
        let temp = TempDir::new().unwrap();
        let policy = PathPolicy::new(temp.path().to_path_buf(), None);

        assert_eq!(policy.resolve("/etc").unwrap(), PathBuf::from("/etc"));
        assert_eq!(policy.resolve("a.txt").unwrap(), temp.path().join("a.txt"));
        assert_eq!(policy.resolve_or_root(None).unwrap(), temp.path());
        assert!(matches!(policy.resolve(""), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_file_operations() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/test.txt");

        let size = write_file(&path, "Hello, World!").unwrap();
        assert_eq!(size, 13);
        assert_eq!(read_file(&path, 1024).unwrap(), "Hello, World!");

        // Overwrite keeps a single file and no temp leftovers
        write_file(&path, "second").unwrap();
        assert_eq!(read_file(&path, 1024).unwrap(), "second");
        let names: Vec<_> = fs::read_dir(temp.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);

        assert!(matches!(read_file(&path, 3), Err(AppError::InvalidInput(_))));
        assert!(matches!(
            read_file(&temp.path().join("missing"), 1024),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_rejects_binary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob.bin");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(read_file(&path, 1024), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_create_entry() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let file = create_entry(root, "notes.md", NewEntryKind::File).unwrap();
        assert!(file.is_file());
        let folder = create_entry(root, "docs", NewEntryKind::Folder).unwrap();
        assert!(folder.is_dir());

        assert!(matches!(
            create_entry(root, "notes.md", NewEntryKind::File),
            Err(AppError::AlreadyExists(_))
        ));
        assert!(matches!(
            create_entry(root, "../x", NewEntryKind::File),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            create_entry(root, "", NewEntryKind::Folder),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rename_entry() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("old.txt"), "a").unwrap();
        fs::write(root.join("taken.txt"), "b").unwrap();

        let new_path = rename_entry(&root.join("old.txt"), "new.txt").unwrap();
        assert_eq!(new_path, root.join("new.txt"));
        assert!(!root.join("old.txt").exists());

        // Renaming onto an existing name never overwrites
        assert!(matches!(
            rename_entry(&root.join("new.txt"), "taken.txt"),
            Err(AppError::AlreadyExists(_))
        ));
        assert_eq!(fs::read_to_string(root.join("taken.txt")).unwrap(), "b");

        assert!(matches!(
            rename_entry(&root.join("ghost.txt"), "x.txt"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_entries_reports_failures() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("dir/sub")).unwrap();
        fs::write(root.join("dir/sub/f.txt"), "x").unwrap();
        fs::write(root.join("a.txt"), "x").unwrap();

        let deleted = delete_entries(&[root.join("dir"), root.join("a.txt")]).unwrap();
        assert_eq!(deleted, 2);
        assert!(!root.join("dir").exists());

        fs::write(root.join("b.txt"), "x").unwrap();
        let err = delete_entries(&[root.join("b.txt"), root.join("missing")]).unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert!(!root.join("b.txt").exists());

        assert!(matches!(
            delete_entries(&[root.join("missing")]),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_copy_merges_and_overwrites() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/inner")).unwrap();
        fs::write(root.join("src/inner/a.txt"), "new").unwrap();
        fs::create_dir_all(root.join("dest/src/inner")).unwrap();
        fs::write(root.join("dest/src/inner/a.txt"), "old").unwrap();
        fs::write(root.join("dest/src/keep.txt"), "keep").unwrap();

        copy_entries(&[root.join("src")], &root.join("dest")).unwrap();

        assert_eq!(
            fs::read_to_string(root.join("dest/src/inner/a.txt")).unwrap(),
            "new"
        );
        assert!(root.join("dest/src/keep.txt").exists());
        assert!(root.join("src/inner/a.txt").exists());

        assert!(matches!(
            copy_entries(&[root.join("src")], &root.join("src/inner")),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_copy_into_own_parent_keeps_content() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a.txt"), "precious").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();

        assert!(matches!(
            copy_entries(&[root.join("a.txt")], root),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            copy_entries(&[root.join("src")], root),
            Err(AppError::InvalidInput(_))
        ));
        // Same folder spelled differently
        assert!(matches!(
            copy_entries(&[root.join("a.txt")], &root.join("src/..")),
            Err(AppError::InvalidInput(_))
        ));

        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "precious");
        assert_eq!(
            fs::read_to_string(root.join("src/main.rs")).unwrap(),
            "fn main() {}"
        );
    }

    #[test]
    fn test_move_entries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("dest")).unwrap();
        fs::create_dir_all(root.join("folder")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();

        let moved = move_entries(&[root.join("a.txt")], &root.join("dest")).unwrap();
        assert_eq!(moved, vec![root.join("dest/a.txt")]);
        assert!(!root.join("a.txt").exists());

        fs::write(root.join("a.txt"), "again").unwrap();
        assert!(matches!(
            move_entries(&[root.join("a.txt")], &root.join("dest")),
            Err(AppError::AlreadyExists(_))
        ));
        assert!(matches!(
            move_entries(&[root.join("folder")], &root.join("folder")),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_upload_target_keeps_base_name() {
        let dir = Path::new("/data");
        assert_eq!(
            upload_target(dir, "../../etc/passwd").unwrap(),
            PathBuf::from("/data/passwd")
        );
        assert!(upload_target(dir, "").is_err());
    }
}
