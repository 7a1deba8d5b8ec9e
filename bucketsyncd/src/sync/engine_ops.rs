use std::future::Future;
use std::path::Path;

use tracing::{debug, info, warn};

use super::{EngineError, SyncEngine};
use crate::sync::local_fs::{self, LocalFile, RemoveOutcome};
use crate::sync::paths::{local_path_for, parent_name, remote_name_for};
use crate::sync::remote::{RemoteError, RemoteFile};

impl SyncEngine {
    /// Retries `call` while it fails with a temporary error the backoff still
    /// allows. Any other error is returned as is.
    async fn with_retry<T, F, Fut>(&self, name: &str, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Err(err) if err.is_temporary() => {
                    attempt += 1;
                    if !self.backoff.allows(attempt) {
                        return Err(err);
                    }
                    let delay = self.backoff.delay(err.retry_after());
                    debug!(name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    pub(super) async fn download(&self, file: &RemoteFile) -> Result<(), EngineError> {
        let target = local_path_for(&self.sync_root, &file.name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = self
            .with_retry(&file.name, || {
                self.remote.download(&self.bucket, &file.id, &target)
            })
            .await;
        match result {
            Ok(()) => {}
            Err(err) if err.is_temporary() => {
                warn!(name = %file.name, error = %err, "download gave up, will retry next pass");
                return Ok(());
            }
            Err(RemoteError::Io(err)) => {
                warn!(name = %file.name, error = %err, "download failed locally, will retry next pass");
                return Ok(());
            }
            Err(err) => {
                warn!(name = %file.name, error = %err, "download failed");
                self.store
                    .mark_download_failed(&file.name, &file.meta())
                    .await?;
                self.store.commit().await?;
                return Ok(());
            }
        }

        let local = LocalFile::stat(&file.name, &target).await?;
        self.store
            .mark_synced(&file.name, &file.meta(), &local.meta())
            .await?;
        self.store.commit().await?;
        info!(name = %file.name, size = file.size, "downloaded");
        Ok(())
    }

    pub(super) async fn upload(&self, file: &LocalFile) -> Result<(), EngineError> {
        // Object names are not unique; drop every older copy first.
        loop {
            let existing = self
                .with_retry(&file.name, || self.remote.find_entry(&self.bucket, &file.name))
                .await;
            let entry = match existing {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(name = %file.name, error = %err, "could not clear previous copy");
                    return Ok(());
                }
            };
            let deleted = self
                .with_retry(&file.name, || self.remote.delete(&self.bucket, &entry.id))
                .await;
            if let Err(err) = deleted {
                warn!(name = %file.name, error = %err, "could not delete previous copy");
                return Ok(());
            }
        }

        // The upload itself is not retried; the next pass decides.
        let local = LocalFile::stat(&file.name, &file.path).await?;
        let result = self
            .remote
            .upload(&self.bucket, &file.name, &file.path)
            .await;
        let entry = match result {
            Ok(entry) => entry,
            Err(RemoteError::Io(err)) => {
                warn!(name = %file.name, error = %err, "upload failed locally, will retry next pass");
                return Ok(());
            }
            Err(err) => {
                warn!(name = %file.name, error = %err, "upload failed");
                self.store
                    .mark_upload_failed(&file.name, &local.meta())
                    .await?;
                self.store.commit().await?;
                return Ok(());
            }
        };

        let remote = match RemoteFile::from_entry(&entry) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(name = %file.name, created = %entry.created, error = %err, "upload returned bad timestamp");
                return Ok(());
            }
        };
        self.store
            .mark_synced(&file.name, &remote.meta(), &local.meta())
            .await?;
        self.store.commit().await?;
        info!(name = %file.name, size = local.size, "uploaded");
        Ok(())
    }

    pub(super) async fn delete_remote(&self, file: &RemoteFile) -> Result<(), EngineError> {
        let result = self
            .with_retry(&file.name, || self.remote.delete(&self.bucket, &file.id))
            .await;
        if let Err(err) = result {
            warn!(name = %file.name, error = %err, "remote delete failed");
            return Ok(());
        }
        self.store.remove(&file.name).await?;
        self.store.commit().await?;
        info!(name = %file.name, "deleted remote copy");
        Ok(())
    }

    pub(super) async fn delete_local(&self, file: &LocalFile) -> Result<(), EngineError> {
        match local_fs::remove_path(&file.path).await {
            Ok(RemoveOutcome::Removed) => info!(name = %file.name, "deleted local copy"),
            Ok(RemoveOutcome::Missing) => debug!(name = %file.name, "already gone"),
            Ok(RemoveOutcome::DirectoryNotEmpty) => {
                debug!(name = %file.name, "directory not empty, leaving it");
            }
            Err(err) => {
                warn!(name = %file.name, error = %err, "local delete failed");
                return Ok(());
            }
        }
        self.store.remove(&file.name).await?;

        if let Some(parent) = parent_name(&file.name) {
            self.remove_empty_parent(parent).await?;
        }
        self.store.commit().await?;
        Ok(())
    }

    async fn remove_empty_parent(&self, parent: &str) -> Result<(), EngineError> {
        let path = local_path_for(&self.sync_root, parent)?;
        if !is_empty_dir(&path).await {
            return Ok(());
        }
        match local_fs::remove_path(&path).await {
            Ok(RemoveOutcome::Removed | RemoveOutcome::Missing) => {
                self.store.remove(parent).await?;
                debug!(name = parent, "removed empty parent directory");
            }
            Ok(RemoveOutcome::DirectoryNotEmpty) => {}
            Err(err) => warn!(name = parent, error = %err, "could not remove parent directory"),
        }
        Ok(())
    }

    pub(super) async fn create_remote_dir(&self, file: &LocalFile) -> Result<(), EngineError> {
        let remote_name = remote_name_for(&file.name, true);
        let existing = self
            .with_retry(&file.name, || self.remote.find_entry(&self.bucket, &remote_name))
            .await;
        let result = match existing {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => {
                self.with_retry(&file.name, || {
                    self.remote.create_placeholder(&self.bucket, &file.name)
                })
                .await
            }
            Err(err) => Err(err),
        };
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(name = %file.name, error = %err, "could not create remote directory");
                return Ok(());
            }
        };
        let remote = match RemoteFile::from_entry(&entry) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(name = %file.name, error = %err, "placeholder returned bad timestamp");
                return Ok(());
            }
        };
        self.store
            .mark_synced(&file.name, &remote.meta(), &file.meta())
            .await?;
        self.store.commit().await?;
        info!(name = %file.name, "created remote directory");
        Ok(())
    }

    pub(super) async fn create_local_dir(&self, file: &RemoteFile) -> Result<(), EngineError> {
        let target = local_path_for(&self.sync_root, &file.name)?;
        tokio::fs::create_dir_all(&target).await?;
        let local = LocalFile::stat(&file.name, &target).await?;
        self.store
            .mark_synced(&file.name, &file.meta(), &local.meta())
            .await?;
        self.store.commit().await?;
        info!(name = %file.name, "created local directory");
        Ok(())
    }
}

async fn is_empty_dir(path: &Path) -> bool {
    local_fs::is_empty_dir(path).await.unwrap_or(false)
}
