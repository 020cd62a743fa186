//! Validated file operations confined to the media and ingest roots.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Extensions accepted when no whitelist is configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".avi", ".m4v", ".ts", ".wmv", ".mov"];

#[derive(Debug, Error)]
pub enum FileOperatorError {
    #[error("Extension not allowed: {0:?}")]
    InvalidExtension(PathBuf),

    #[error("Path is outside the allowed roots: {0:?}")]
    OutsideAllowedRoots(PathBuf),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("File not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Destination already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileOperatorError {
    /// Bad extension, escaped root or malformed name.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FileOperatorError::InvalidExtension(_)
                | FileOperatorError::OutsideAllowedRoots(_)
                | FileOperatorError::InvalidName(_)
                | FileOperatorError::AlreadyExists(_)
        )
    }
}

/// Normalized, immutable set of allowed file extensions (lowercase, with a
/// leading dot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionWhitelist {
    extensions: BTreeSet<String>,
}

impl ExtensionWhitelist {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext))
            .collect();
        Self { extensions }
    }

    pub fn allows(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&format!(".{}", ext.to_lowercase())))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

impl Default for ExtensionWhitelist {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

/// Removes `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Resolves symlinks through the deepest existing ancestor, keeping the
/// not-yet-existing tail as is.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match std::fs::canonicalize(&existing) {
            Ok(resolved) => {
                let mut full = resolved;
                for part in tail.iter().rev() {
                    full.push(part);
                }
                return Ok(full);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(err);
                };
                tail.push(name);
                if !existing.pop() {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

pub struct FileOperator {
    media_root: PathBuf,
    ingest_root: PathBuf,
    extensions: ExtensionWhitelist,
}

impl FileOperator {
    /// Creates both roots if missing and stores their canonical form.
    pub fn new(
        media_root: impl AsRef<Path>,
        ingest_root: impl AsRef<Path>,
        extensions: ExtensionWhitelist,
    ) -> Result<Self, FileOperatorError> {
        std::fs::create_dir_all(media_root.as_ref())?;
        std::fs::create_dir_all(ingest_root.as_ref())?;
        Ok(Self {
            media_root: std::fs::canonicalize(media_root)?,
            ingest_root: std::fs::canonicalize(ingest_root)?,
            extensions,
        })
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn ingest_root(&self) -> &Path {
        &self.ingest_root
    }

    pub fn extensions(&self) -> &ExtensionWhitelist {
        &self.extensions
    }

    /// Absolute, symlink-free form of `path`, which must fall under one of
    /// the two roots.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, FileOperatorError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let resolved = resolve_existing_prefix(&normalize_lexically(&absolute))?;
        if resolved.starts_with(&self.media_root) || resolved.starts_with(&self.ingest_root) {
            Ok(resolved)
        } else {
            Err(FileOperatorError::OutsideAllowedRoots(path.to_path_buf()))
        }
    }

    fn check_extension(&self, requested: &Path, resolved: &Path) -> Result<(), FileOperatorError> {
        if self.extensions.allows(requested) && self.extensions.allows(resolved) {
            Ok(())
        } else {
            Err(FileOperatorError::InvalidExtension(requested.to_path_buf()))
        }
    }

    /// Validates a source/destination pair for copy and move.
    async fn validate_transfer(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<(PathBuf, PathBuf), FileOperatorError> {
        let resolved_source = self.resolve(source)?;
        let resolved_destination = self.resolve(destination)?;
        self.check_extension(source, &resolved_source)?;
        self.check_extension(destination, &resolved_destination)?;

        match fs::metadata(&resolved_source).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(FileOperatorError::NotFound(source.to_path_buf())),
        }
        if fs::symlink_metadata(&resolved_destination).await.is_ok() {
            return Err(FileOperatorError::AlreadyExists(destination.to_path_buf()));
        }
        Ok((resolved_source, resolved_destination))
    }

    /// Copies into a hidden sibling of the destination, then renames it into
    /// place so the destination name never points at a partial file.
    async fn copy_into_place(source: &Path, destination: &Path) -> Result<(), FileOperatorError> {
        let parent = destination
            .parent()
            .ok_or_else(|| FileOperatorError::InvalidName(destination.display().to_string()))?;
        fs::create_dir_all(parent).await?;

        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let staging = parent.join(format!(".{}.partial-{}", file_name, uuid::Uuid::new_v4()));

        let result = async {
            fs::copy(source, &staging).await?;
            fs::rename(&staging, destination).await
        }
        .await;

        if let Err(err) = result {
            Self::discard(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Removes a copy left behind by a failed transfer. Returns false, after
    /// logging, when the copy is still there.
    async fn discard(path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                error!("Could not remove leftover copy {:?}: {}", path, err);
                false
            }
        }
    }

    pub async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<PathBuf, FileOperatorError> {
        let (source, destination) = self.validate_transfer(source, destination).await?;
        Self::copy_into_place(&source, &destination).await?;
        debug!("Copied {:?} -> {:?}", source, destination);
        Ok(destination)
    }

    /// Moves a file, falling back to copy + delete across filesystems. The
    /// source is only removed once the destination is complete; if that
    /// removal fails the copy is undone so the file has a single name.
    pub async fn move_file(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<PathBuf, FileOperatorError> {
        let (source, destination) = self.validate_transfer(source, destination).await?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(err) = fs::rename(&source, &destination).await {
            debug!(
                "Rename {:?} -> {:?} failed ({}), copying instead",
                source, destination, err
            );
            Self::copy_into_place(&source, &destination).await?;
            if let Err(err) = fs::remove_file(&source).await {
                warn!(
                    "Could not remove {:?} after copying, rolling back: {}",
                    source, err
                );
                if !Self::discard(&destination).await {
                    error!(
                        "{:?} is now reachable as both {:?} and {:?}",
                        source, source, destination
                    );
                }
                return Err(err.into());
            }
        }
        debug!("Moved {:?} -> {:?}", source, destination);
        Ok(destination)
    }

    /// Renames a file inside its own directory.
    pub async fn rename_file(
        &self,
        path: &Path,
        new_name: &str,
    ) -> Result<PathBuf, FileOperatorError> {
        let name_is_valid = !new_name.trim().is_empty()
            && !new_name.contains(['/', '\\'])
            && new_name != "."
            && new_name != ".."
            && !new_name.split('.').all(|part| part.is_empty());
        if !name_is_valid {
            return Err(FileOperatorError::InvalidName(new_name.to_string()));
        }

        let resolved = self.resolve(path)?;
        let parent = resolved
            .parent()
            .ok_or_else(|| FileOperatorError::InvalidName(new_name.to_string()))?;
        let target = parent.join(new_name);
        self.move_file(&resolved, &target).await
    }

    /// Deletes an existing whitelisted file.
    pub async fn delete_file(&self, path: &Path) -> Result<(), FileOperatorError> {
        let resolved = self.resolve(path)?;
        self.check_extension(path, &resolved)?;
        match fs::symlink_metadata(&resolved).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(FileOperatorError::NotFound(path.to_path_buf())),
        }
        fs::remove_file(&resolved).await?;
        debug!("Deleted {:?}", resolved);
        Ok(())
    }

    /// Whitelisted regular files under `dir`, sorted by path. Unreadable
    /// entries are logged and skipped.
    pub fn list_files(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, FileOperatorError> {
        let resolved = self.resolve(dir)?;
        if !resolved.is_dir() {
            return Err(FileOperatorError::NotFound(dir.to_path_buf()));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files: Vec<PathBuf> = WalkDir::new(&resolved)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Skipping unreadable entry under {:?}: {}", resolved, err);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.extensions.allows(path))
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        media: PathBuf,
        ingest: PathBuf,
        operator: FileOperator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("media");
        let ingest = dir.path().join("ingest");
        let operator = FileOperator::new(&media, &ingest, ExtensionWhitelist::default()).unwrap();
        Fixture {
            media: operator.media_root().to_path_buf(),
            ingest: operator.ingest_root().to_path_buf(),
            _dir: dir,
            operator,
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_whitelist_normalizes() {
        let whitelist = ExtensionWhitelist::new(["MKV", ".Mp4", " avi ", ""]);
        assert_eq!(whitelist.iter().collect::<Vec<_>>(), vec![".avi", ".mkv", ".mp4"]);
        assert!(whitelist.allows(Path::new("/x/Movie.MKV")));
        assert!(!whitelist.allows(Path::new("/x/notes.txt")));
        assert!(!whitelist.allows(Path::new("/x/no_extension")));
    }

    #[tokio::test]
    async fn test_copy_creates_parents_and_keeps_source() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");
        let destination = f.media.join("Movies/A/a.mkv");

        let result = f.operator.copy_file(&source, &destination).await.unwrap();

        assert_eq!(result, destination);
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "data");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_copy_outside_roots_is_validation_error() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");

        let err = f
            .operator
            .copy_file(&source, Path::new("/etc/a.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOperatorError::OutsideAllowedRoots(_)));
        assert!(err.is_validation());

        // a bad extension does not change the outcome
        let err = f
            .operator
            .copy_file(&source, Path::new("/etc/a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOperatorError::OutsideAllowedRoots(_)));
    }

    #[tokio::test]
    async fn test_parent_segments_cannot_escape() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");
        let sneaky = f.media.join("../../outside/a.mkv");

        let err = f.operator.copy_file(&source, &sneaky).await.unwrap_err();
        assert!(matches!(err, FileOperatorError::OutsideAllowedRoots(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let f = fixture();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), f.media.join("link")).unwrap();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");

        let err = f
            .operator
            .copy_file(&source, &f.media.join("link/a.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOperatorError::OutsideAllowedRoots(_)));
        assert!(!outside.path().join("a.mkv").exists());
    }

    #[tokio::test]
    async fn test_extension_violation_is_distinct() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");

        let err = f
            .operator
            .copy_file(&source, &f.media.join("a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOperatorError::InvalidExtension(_)));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_move_refuses_to_overwrite() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        let destination = f.media.join("a.mkv");
        write(&source, "new");
        write(&destination, "old");

        let err = f.operator.move_file(&source, &destination).await.unwrap_err();
        assert!(matches!(err, FileOperatorError::AlreadyExists(_)));
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "old");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let f = fixture();
        let err = f
            .operator
            .move_file(&f.ingest.join("ghost.mkv"), &f.media.join("ghost.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOperatorError::NotFound(_)));
        assert!(!err.is_validation());
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");
        let destination = f.media.join("Movies/A (2000)/a.mkv");

        f.operator.move_file(&source, &destination).await.unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_rename_rejects_escaping_names() {
        let f = fixture();
        let source = f.ingest.join("a.mkv");
        write(&source, "data");

        for bad in ["../b.mkv", "sub/b.mkv", "b\\c.mkv", "..", ".", "", "  "] {
            let err = f.operator.rename_file(&source, bad).await.unwrap_err();
            assert!(
                matches!(err, FileOperatorError::InvalidName(_)),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_rename_within_directory() {
        let f = fixture();
        let source = f.ingest.join("sub/a.mkv");
        write(&source, "data");

        let renamed = f.operator.rename_file(&source, "b.mkv").await.unwrap();
        assert_eq!(renamed, f.ingest.join("sub/b.mkv"));
        assert!(!source.exists());
        assert!(renamed.exists());
    }

    #[tokio::test]
    async fn test_delete_requires_existing_file() {
        let f = fixture();
        let path = f.ingest.join("a.mkv");

        let err = f.operator.delete_file(&path).await.unwrap_err();
        assert!(matches!(err, FileOperatorError::NotFound(_)));

        write(&path, "data");
        f.operator.delete_file(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delete_checks_extension() {
        let f = fixture();
        let path = f.ingest.join("notes.txt");
        write(&path, "keep me");

        let err = f.operator.delete_file(&path).await.unwrap_err();
        assert!(matches!(err, FileOperatorError::InvalidExtension(_)));
        assert!(path.exists());
    }

    #[test]
    fn test_list_filters_and_sorts() {
        let f = fixture();
        write(&f.ingest.join("b.mkv"), "");
        write(&f.ingest.join("a.MP4"), "");
        write(&f.ingest.join("readme.txt"), "");
        write(&f.ingest.join("nested/c.avi"), "");
        std::fs::create_dir_all(f.ingest.join("folder.mkv")).unwrap();

        let flat = f.operator.list_files(&f.ingest, false).unwrap();
        assert_eq!(flat, vec![f.ingest.join("a.MP4"), f.ingest.join("b.mkv")]);

        let deep = f.operator.list_files(&f.ingest, true).unwrap();
        assert_eq!(
            deep,
            vec![
                f.ingest.join("a.MP4"),
                f.ingest.join("b.mkv"),
                f.ingest.join("nested/c.avi"),
            ]
        );
    }

    #[test]
    fn test_list_outside_roots_is_rejected() {
        let f = fixture();
        let err = f.operator.list_files(Path::new("/"), false).unwrap_err();
        assert!(matches!(err, FileOperatorError::OutsideAllowedRoots(_)));
    }

    #[tokio::test]
    async fn test_discard_reports_copies_it_cannot_remove() {
        let f = fixture();
        let leftover = f.media.join("Movies/leftover.mkv");
        write(&leftover, "partial");

        assert!(FileOperator::discard(&leftover).await);
        assert!(!leftover.exists());
        // already gone counts as discarded
        assert!(FileOperator::discard(&leftover).await);

        let stuck = f.media.join("Movies/stuck.mkv");
        std::fs::create_dir_all(&stuck).unwrap();
        assert!(!FileOperator::discard(&stuck).await);
        assert!(stuck.exists());
    }
}
