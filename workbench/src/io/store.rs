//! Project store: plain file operations on guard-resolved paths.
//!
//! Callers resolve paths through [`crate::core::sandbox`] first; nothing in
//! this module re-checks containment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, WorkbenchError};

/// Create the project root (and missing parents). Idempotent.
pub fn ensure_root(root: &Path) -> Result<()> {
    fs::create_dir_all(root).map_err(|e| WorkbenchError::from_io(e, "create directory", root))
}

/// Every regular file under `root`, relative to it, `/`-separated.
///
/// Depth-first, sorted by file name within each directory. Symlinks are
/// followed; a link that loops back to an ancestor is skipped. A missing
/// root yields an empty list.
pub fn list(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for file in walk_files(root) {
        let (relative, _) = file?;
        files.push(relative);
    }
    Ok(files)
}

/// Walk regular files under `root`, yielding `(relative name, absolute path)`.
///
/// Shared by [`list`] and the archive exporter so both see the same tree.
pub(crate) fn walk_files(root: &Path) -> impl Iterator<Item = Result<(String, PathBuf)>> + '_ {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    return None;
                }
                let relative = relative_name(root, entry.path())?;
                Some(Ok((relative, entry.into_path())))
            }
            Err(err) if err.loop_ancestor().is_some() => {
                warn!(path = ?err.path(), "skipping symlink loop");
                None
            }
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                Some(Err(match err.into_io_error() {
                    Some(io_err) => WorkbenchError::from_io(io_err, "walk", &path),
                    None => WorkbenchError::Io {
                        context: format!("walk {}", path.display()),
                        message: "directory walk failed".to_string(),
                    },
                }))
            }
        })
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

pub fn read(path: &Path) -> Result<Vec<u8>> {
    if path.is_dir() {
        return Err(WorkbenchError::NotFound {
            path: path.to_path_buf(),
        });
    }
    fs::read(path).map_err(|e| WorkbenchError::from_io(e, "read", path))
}

/// Full-content overwrite, creating parent directories first.
pub fn write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| WorkbenchError::from_io(e, "create directory", parent))?;
    }
    fs::write(path, contents).map_err(|e| WorkbenchError::from_io(e, "write", path))?;
    debug!(path = %path.display(), bytes = contents.len(), "file written");
    Ok(())
}

pub fn delete(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Err(WorkbenchError::NotFound {
            path: path.to_path_buf(),
        });
    }
    fs::remove_file(path).map_err(|e| WorkbenchError::from_io(e, "delete", path))
}

/// Move an already-received upload into `root/<filename>`.
///
/// `filename` must already be a bare base name. If the rename fails (for
/// instance across filesystems) the file is copied and the source removed.
pub fn place_upload(root: &Path, filename: &str, source: &Path) -> Result<PathBuf> {
    place_with(root, filename, source, |from, to| fs::rename(from, to))
}

fn place_with(
    root: &Path,
    filename: &str,
    source: &Path,
    rename: impl FnOnce(&Path, &Path) -> io::Result<()>,
) -> Result<PathBuf> {
    ensure_root(root)?;
    let dest = root.join(filename);
    match rename(source, &dest) {
        Ok(()) => {
            debug!(dest = %dest.display(), "upload moved");
        }
        Err(rename_err) => {
            if rename_err.kind() == io::ErrorKind::NotFound && !source.exists() {
                return Err(WorkbenchError::from_io(rename_err, "move upload", source));
            }
            debug!(err = %rename_err, "rename failed, copying upload");
            copy_then_remove(source, &dest)?;
        }
    }
    Ok(dest)
}

fn copy_then_remove(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).map_err(|e| WorkbenchError::from_io(e, "copy upload", dest))?;
    if let Err(e) = fs::remove_file(source) {
        warn!(err = %e, source = %source.display(), "failed to remove upload temp file");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/a.txt");
        write(&path, b"hello").expect("write");
        assert_eq!(read(&path).expect("read"), b"hello");

        write(&path, b"bye").expect("overwrite");
        assert_eq!(read(&path).expect("read"), b"bye");
    }

    #[test]
    fn read_missing_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read(&temp.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, WorkbenchError::NotFound { .. }));
    }

    #[test]
    fn delete_twice_reports_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a.txt");
        write(&path, b"x").expect("write");
        delete(&path).expect("first delete");
        let err = delete(&path).unwrap_err();
        assert!(matches!(err, WorkbenchError::NotFound { .. }));
    }

    #[test]
    fn list_is_relative_and_skips_empty_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("sub/b.txt"), b"b").expect("write");
        write(&root.join("a.txt"), b"a").expect("write");
        fs::create_dir_all(root.join("empty/deeper")).expect("mkdir");

        let files = list(root).expect("list");
        assert_eq!(files, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }

    #[test]
    fn list_missing_root_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(list(&temp.path().join("absent")).expect("list").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn list_survives_symlink_loops() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(&root.join("dir/file.txt"), b"x").expect("write");
        std::os::unix::fs::symlink(root.join("dir"), root.join("dir/back")).expect("symlink");

        let files = list(root).expect("list");
        assert_eq!(files, vec!["dir/file.txt".to_string()]);
    }

    #[test]
    fn ensure_root_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("p/q");
        ensure_root(&root).expect("first");
        ensure_root(&root).expect("second");
        assert!(root.is_dir());
    }

    #[test]
    fn place_upload_moves_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("upload.tmp");
        fs::write(&source, b"data").expect("write");
        let root = temp.path().join("project");

        let dest = place_upload(&root, "data.csv", &source).expect("place");
        assert_eq!(dest, root.join("data.csv"));
        assert_eq!(fs::read(&dest).expect("read"), b"data");
        assert!(!source.exists());
    }

    #[test]
    fn failed_rename_falls_back_to_copy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("upload.tmp");
        fs::write(&source, b"payload").expect("write");
        let root = temp.path().join("project");

        let dest = place_with(&root, "dest.bin", &source, |_, _| {
            Err(io::Error::new(io::ErrorKind::CrossesDevices, "cross-device link"))
        })
        .expect("place");
        assert_eq!(dest, root.join("dest.bin"));
        assert_eq!(fs::read(&dest).expect("read"), b"payload");
        assert!(!source.exists());
    }

    #[test]
    fn place_upload_onto_directory_is_io_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("upload.tmp");
        fs::write(&source, b"payload").expect("write");
        let root = temp.path().join("project");
        fs::create_dir_all(root.join("taken")).expect("mkdir");

        let err = place_upload(&root, "taken", &source).unwrap_err();
        assert!(matches!(err, WorkbenchError::Io { .. }));
        assert!(source.exists(), "failed placement keeps the upload");
    }
}
