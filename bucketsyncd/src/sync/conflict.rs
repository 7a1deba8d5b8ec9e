use super::local_fs::LocalFile;
use super::remote::RemoteFile;

/// What one side of a path looks like when both sides have a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    pub modified: i64,
    pub size: i64,
    pub is_dir: bool,
}

impl From<&RemoteFile> for FileMetadata {
    fn from(file: &RemoteFile) -> Self {
        Self {
            modified: file.created,
            size: file.size,
            is_dir: file.is_dir,
        }
    }
}

impl From<&LocalFile> for FileMetadata {
    fn from(file: &LocalFile) -> Self {
        Self {
            modified: file.modified,
            size: file.size,
            is_dir: file.is_dir,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Synced,
    UploadLocal,
    DownloadRemote,
    /// File on one side, directory on the other.
    KindMismatch,
}

/// Equal sizes count as identical content; no hash is computed. Otherwise
/// the newer side wins and the remote copy wins ties.
pub fn resolve_conflict(remote: &FileMetadata, local: &FileMetadata) -> ConflictDecision {
    match (remote.is_dir, local.is_dir) {
        (true, true) => return ConflictDecision::Synced,
        (true, false) | (false, true) => return ConflictDecision::KindMismatch,
        (false, false) => {}
    }

    if remote.size == local.size {
        ConflictDecision::Synced
    } else if remote.modified < local.modified {
        ConflictDecision::UploadLocal
    } else {
        ConflictDecision::DownloadRemote
    }
}
