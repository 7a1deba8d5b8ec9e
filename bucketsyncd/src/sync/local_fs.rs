use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::warn;
use walkdir::WalkDir;

use super::index::LocalMeta;
use super::paths::canonical_name;

/// A path found under the sync root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: i64,
    pub size: i64,
    pub is_dir: bool,
}

impl LocalFile {
    pub fn meta(&self) -> LocalMeta {
        LocalMeta {
            modified: self.modified,
            size: self.size,
        }
    }

    fn from_metadata(name: String, path: PathBuf, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        Self {
            name,
            path,
            modified: modified_millis(metadata),
            size: if is_dir { 0 } else { metadata.len() as i64 },
            is_dir,
        }
    }

    pub async fn stat(name: &str, path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self::from_metadata(
            name.to_string(),
            path.to_path_buf(),
            &metadata,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Missing,
    DirectoryNotEmpty,
}

/// Lists every file and directory below `root`. Entries that cannot be read
/// or named are logged and left out.
pub async fn walk(root: &Path) -> io::Result<Vec<LocalFile>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_blocking(&root))
        .await
        .map_err(io::Error::other)?
}

fn walk_blocking(root: &Path) -> io::Result<Vec<LocalFile>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("sync root {} is not a directory", root.display()),
        ));
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_symlink() {
            continue;
        }
        let name = match canonical_name(root, entry.path()) {
            Ok(name) => name,
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "skipping entry");
                continue;
            }
        };
        match entry.metadata() {
            Ok(metadata) => out.push(LocalFile::from_metadata(
                name,
                entry.path().to_path_buf(),
                &metadata,
            )),
            Err(err) => warn!(name = %name, error = %err, "skipping entry without metadata"),
        }
    }
    Ok(out)
}

/// Removes a file or an empty directory. A non-empty directory is reported
/// instead of treated as an error.
pub async fn remove_path(path: &Path) -> io::Result<RemoveOutcome> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RemoveOutcome::Missing),
        Err(err) => return Err(err),
    };
    let result = if metadata.is_dir() {
        tokio::fs::remove_dir(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => Ok(RemoveOutcome::Removed),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RemoveOutcome::Missing),
        Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
            Ok(RemoveOutcome::DirectoryNotEmpty)
        }
        Err(err) => Err(err),
    }
}

pub async fn is_empty_dir(path: &Path) -> io::Result<bool> {
    let mut entries = tokio::fs::read_dir(path).await?;
    Ok(entries.next_entry().await?.is_none())
}

fn modified_millis(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}
