use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::archive::paths::RelativePath;
use crate::security::hash_path;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("path resolves outside the upload root")]
    OutsideRoot,
    #[error("symlink encountered under the upload root")]
    SymlinkDenied,
    #[error("file already exists")]
    AlreadyExists,
    #[error("media file not found")]
    NotFound,
    #[error("media I/O failed during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl MediaStoreError {
    fn io(operation: &'static str, source: std::io::Error) -> Self {
        match source.kind() {
            ErrorKind::NotFound => MediaStoreError::NotFound,
            ErrorKind::AlreadyExists => MediaStoreError::AlreadyExists,
            _ => MediaStoreError::Io { operation, source },
        }
    }
}

/// Binary media storage addressed by upload-root relative paths.
pub trait MediaStore {
    fn exists(&self, path: &RelativePath) -> Result<bool, MediaStoreError>;
    fn read(&self, path: &RelativePath) -> Result<Vec<u8>, MediaStoreError>;
    fn create_dir_all(&self, path: &RelativePath) -> Result<(), MediaStoreError>;
    /// Write a new file. Never replaces an existing one.
    fn write(&self, path: &RelativePath, bytes: &[u8]) -> Result<(), MediaStoreError>;
    fn delete(&self, path: &RelativePath) -> Result<(), MediaStoreError>;
}

/// Filesystem media store rooted at the configured upload directory.
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: Arc<PathBuf>,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn resolve(&self, path: &RelativePath) -> Result<PathBuf, MediaStoreError> {
        let full = path.to_path_under(self.root());
        if !full.starts_with(self.root()) {
            return Err(self.deny(path, MediaStoreError::OutsideRoot));
        }
        if reject_symlinks(self.root(), &full).is_err() {
            return Err(self.deny(path, MediaStoreError::SymlinkDenied));
        }
        Ok(full)
    }

    fn deny(&self, path: &RelativePath, err: MediaStoreError) -> MediaStoreError {
        tracing::warn!(
            target: "waymark",
            event = "media_guard",
            outcome = "deny",
            reason = %err,
            path_hash = %hash_path(Path::new(path.as_str()))
        );
        err
    }
}

impl MediaStore for FsMediaStore {
    fn exists(&self, path: &RelativePath) -> Result<bool, MediaStoreError> {
        let full = self.resolve(path)?;
        match fs::symlink_metadata(&full) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MediaStoreError::io("exists", err)),
        }
    }

    fn read(&self, path: &RelativePath) -> Result<Vec<u8>, MediaStoreError> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|err| MediaStoreError::io("read", err))
    }

    fn create_dir_all(&self, path: &RelativePath) -> Result<(), MediaStoreError> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).map_err(|err| MediaStoreError::io("create_dir_all", err))
    }

    fn write(&self, path: &RelativePath, bytes: &[u8]) -> Result<(), MediaStoreError> {
        let full = self.resolve(path)?;
        let parent = full.parent().unwrap_or_else(|| self.root());
        let mut tmp =
            NamedTempFile::new_in(parent).map_err(|err| MediaStoreError::io("write_tmp", err))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|err| MediaStoreError::io("write", err))?;
        tmp.persist_noclobber(&full)
            .map_err(|err| MediaStoreError::io("persist", err.error))?;
        Ok(())
    }

    fn delete(&self, path: &RelativePath) -> Result<(), MediaStoreError> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|err| MediaStoreError::io("delete", err))
    }
}

/// Walk each existing component below `base` and refuse symlinks. Segments
/// that do not exist yet end the walk.
fn reject_symlinks(base: &Path, path: &Path) -> Result<(), &'static str> {
    let mut cur = base.to_path_buf();
    for comp in path
        .strip_prefix(base)
        .unwrap_or(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
    {
        cur.push(comp.as_os_str());
        match fs::symlink_metadata(&cur) {
            Ok(meta) if meta.file_type().is_symlink() => return Err("symlink encountered"),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(_) => {}
        }
    }
    Ok(())
}
