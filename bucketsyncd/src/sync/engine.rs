use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::conflict::{ConflictDecision, FileMetadata, resolve_conflict};
use super::index::{StateStore, StoreError, SyncRecord, SyncState};
use super::local_fs::{self, LocalFile};
use super::notifier::SyncNotifier;
use super::paths::{ExclusionFilter, PathError, split_remote_name};
use super::queue::{Task, TaskQueue};
use super::quiescence::LocalActivity;
use super::remote::{RemoteError, RemoteFile, RemoteStore};
use super::scheduler::TaskRunner;

#[path = "engine_ops.rs"]
mod ops;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bucket: String,
    pub sync_root: PathBuf,
    pub filter: ExclusionFilter,
    pub backoff: Backoff,
}

/// Counts of what one reconcile pass decided.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub downloads: usize,
    pub uploads: usize,
    pub remote_deletes: usize,
    pub local_deletes: usize,
    pub local_dirs: usize,
    pub remote_dirs: usize,
    pub resolved: usize,
    pub conflicts: usize,
    pub cleaned: usize,
    pub skipped: usize,
}

impl PassSummary {
    pub fn emitted(&self) -> usize {
        self.downloads
            + self.uploads
            + self.remote_deletes
            + self.local_deletes
            + self.local_dirs
            + self.remote_dirs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Local writes were still settling; the pass re-armed itself.
    Skipped,
    Completed(PassSummary),
}

/// Everything a pass or task touches, shared by reference.
pub struct SyncEngine {
    store: StateStore,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn SyncNotifier>,
    queue: Arc<TaskQueue>,
    activity: LocalActivity,
    bucket: String,
    sync_root: PathBuf,
    filter: ExclusionFilter,
    backoff: Backoff,
    synchronizing: AtomicBool,
}

struct Pass {
    tasks: Vec<Task>,
    summary: PassSummary,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        store: StateStore,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn SyncNotifier>,
        queue: Arc<TaskQueue>,
        activity: LocalActivity,
    ) -> Self {
        Self {
            store,
            remote,
            notifier,
            queue,
            activity,
            bucket: config.bucket,
            sync_root: config.sync_root,
            filter: config.filter,
            backoff: config.backoff,
            synchronizing: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Diffs both listings against the store, queues the resulting tasks and
    /// re-arms itself. Nothing is queued unless the pass committed.
    pub async fn reconcile(&self) -> Result<PassOutcome, EngineError> {
        if self.activity.in_progress() {
            debug!("local changes in progress, postponing reconcile");
            self.queue.push(Task::Sleep);
            self.queue.push(Task::Reconcile);
            return Ok(PassOutcome::Skipped);
        }

        let pass = match self.run_pass().await {
            Ok(pass) => pass,
            Err(err) => {
                if let Err(rollback) = self.store.rollback().await {
                    warn!(error = %rollback, "rollback after failed pass failed");
                }
                return Err(err);
            }
        };

        let emitted = pass.tasks.len();
        self.queue.rearm(pass.tasks);
        self.set_synchronizing(emitted > 0);

        let summary = pass.summary;
        info!(
            downloads = summary.downloads,
            uploads = summary.uploads,
            remote_deletes = summary.remote_deletes,
            local_deletes = summary.local_deletes,
            local_dirs = summary.local_dirs,
            remote_dirs = summary.remote_dirs,
            resolved = summary.resolved,
            conflicts = summary.conflicts,
            cleaned = summary.cleaned,
            skipped = summary.skipped,
            "reconcile pass finished"
        );
        Ok(PassOutcome::Completed(summary))
    }

    fn set_synchronizing(&self, pending: bool) {
        let was = self.synchronizing.swap(pending, Ordering::SeqCst);
        match (was, pending) {
            (false, true) => self.notifier.synchronizing(),
            (true, false) => self.notifier.idle(),
            _ => {}
        }
    }

    async fn run_pass(&self) -> Result<Pass, EngineError> {
        let entries = self.remote.list_entries(&self.bucket).await?;
        let locals = local_fs::walk(&self.sync_root).await?;

        let mut pass = Pass {
            tasks: Vec::new(),
            summary: PassSummary::default(),
        };
        let mut remote = BTreeMap::new();
        let mut unreadable = HashSet::new();
        for entry in entries {
            if !entry.is_decrypted {
                debug!(id = %entry.id, "ignoring entry with undecryptable name");
                continue;
            }
            match RemoteFile::from_entry(&entry) {
                Ok(file) if file.name.is_empty() => {}
                Ok(file) => {
                    remote.insert(file.name.clone(), file);
                }
                Err(err) => {
                    warn!(name = %entry.name, created = %entry.created, error = %err, "skipping entry with bad timestamp");
                    unreadable.insert(split_remote_name(&entry.name).0.to_string());
                    pass.summary.skipped += 1;
                }
            }
        }
        let mut local: BTreeMap<String, LocalFile> = locals
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect();

        for record in self.store.all().await? {
            if !remote.contains_key(&record.name)
                && !local.contains_key(&record.name)
                && !unreadable.contains(&record.name)
            {
                debug!(name = %record.name, "dropping record absent on both sides");
                self.store.remove(&record.name).await?;
                pass.summary.cleaned += 1;
            }
        }

        for (name, file) in &remote {
            let tracked = self.store.get(name).await?;
            match local.remove(name) {
                None => self.remote_only(file, tracked, &mut pass).await?,
                Some(local_file) => {
                    self.both_sides(file, &local_file, tracked, &mut pass)
                        .await?
                }
            }
        }

        for (name, file) in local {
            if unreadable.contains(&name) {
                continue;
            }
            let tracked = self.store.get(&name).await?;
            self.local_only(file, tracked, &mut pass).await?;
        }

        self.store.commit().await?;
        Ok(pass)
    }

    async fn remote_only(
        &self,
        file: &RemoteFile,
        tracked: Option<SyncRecord>,
        pass: &mut Pass,
    ) -> Result<(), EngineError> {
        let Some(record) = tracked else {
            return self.fetch(file, pass).await;
        };

        let remote_changed = !file.is_dir && record.remote_created != file.created;
        let fetch_pending = matches!(
            record.state,
            SyncState::ForDownload | SyncState::ForLocalCreateDir
        ) && record.local_modified == 0;

        if remote_changed || fetch_pending {
            self.fetch(file, pass).await
        } else if record.state == SyncState::DownloadFailed {
            if record.local_modified == 0 {
                self.store
                    .mark_download_failed(&file.name, &file.meta())
                    .await?;
                Ok(())
            } else {
                self.fetch(file, pass).await
            }
        } else {
            self.store.mark_for_remote_delete(&file.name).await?;
            pass.tasks.push(Task::DeleteRemote(file.clone()));
            pass.summary.remote_deletes += 1;
            Ok(())
        }
    }

    async fn both_sides(
        &self,
        remote: &RemoteFile,
        local: &LocalFile,
        tracked: Option<SyncRecord>,
        pass: &mut Pass,
    ) -> Result<(), EngineError> {
        let Some(record) = tracked else {
            return self.resolve(remote, local, None, pass).await;
        };
        if remote.is_dir != local.is_dir {
            return self.resolve(remote, local, Some(record.state), pass).await;
        }

        let remote_changed = !remote.is_dir && record.remote_created != remote.created;
        let local_changed = !local.is_dir && record.local_modified != local.modified;
        let fetch_pending = matches!(
            record.state,
            SyncState::ForDownload | SyncState::ForLocalCreateDir | SyncState::Conflict
        );
        let push_pending = matches!(
            record.state,
            SyncState::ForUpload | SyncState::ForRemoteCreateDir
        );

        if (remote_changed && local_changed) || fetch_pending {
            self.resolve(remote, local, Some(record.state), pass).await
        } else if push_pending || (local_changed && !remote_changed) {
            self.push(local, pass).await
        } else if remote_changed {
            self.fetch(remote, pass).await
        } else {
            Ok(())
        }
    }

    async fn local_only(
        &self,
        file: LocalFile,
        tracked: Option<SyncRecord>,
        pass: &mut Pass,
    ) -> Result<(), EngineError> {
        let Some(record) = tracked else {
            if self.filter.is_excluded(&file.name) {
                debug!(name = %file.name, "excluded from upload");
                return Ok(());
            }
            return self.push(&file, pass).await;
        };

        let local_changed = !file.is_dir && record.local_modified != file.modified;
        let push_pending = matches!(
            record.state,
            SyncState::ForUpload | SyncState::ForRemoteCreateDir
        ) && record.remote_created == 0;

        if local_changed || push_pending {
            self.push(&file, pass).await
        } else if record.state == SyncState::UploadFailed && record.remote_created == 0 {
            self.store
                .mark_upload_failed(&file.name, &file.meta())
                .await?;
            Ok(())
        } else {
            self.store.mark_for_local_delete(&file.name).await?;
            pass.summary.local_deletes += 1;
            pass.tasks.push(Task::DeleteLocal(file));
            Ok(())
        }
    }

    async fn resolve(
        &self,
        remote: &RemoteFile,
        local: &LocalFile,
        state: Option<SyncState>,
        pass: &mut Pass,
    ) -> Result<(), EngineError> {
        match resolve_conflict(&FileMetadata::from(remote), &FileMetadata::from(local)) {
            ConflictDecision::Synced => {
                self.store
                    .mark_synced(&remote.name, &remote.meta(), &local.meta())
                    .await?;
                pass.summary.resolved += 1;
                Ok(())
            }
            ConflictDecision::UploadLocal => self.push(local, pass).await,
            ConflictDecision::DownloadRemote => self.fetch(remote, pass).await,
            ConflictDecision::KindMismatch => {
                if state != Some(SyncState::Conflict) {
                    warn!(name = %remote.name, "file and directory share a name");
                    self.store
                        .mark_conflict(&remote.name, &remote.meta(), &local.meta())
                        .await?;
                }
                pass.summary.conflicts += 1;
                Ok(())
            }
        }
    }

    async fn fetch(&self, file: &RemoteFile, pass: &mut Pass) -> Result<(), EngineError> {
        if file.is_dir {
            self.store
                .mark_for_local_create_dir(&file.name, &file.meta())
                .await?;
            pass.tasks.push(Task::CreateLocalDir(file.clone()));
            pass.summary.local_dirs += 1;
        } else {
            self.store
                .mark_for_download(&file.name, &file.meta())
                .await?;
            pass.tasks.push(Task::Download(file.clone()));
            pass.summary.downloads += 1;
        }
        Ok(())
    }

    async fn push(&self, file: &LocalFile, pass: &mut Pass) -> Result<(), EngineError> {
        if file.is_dir {
            self.store
                .mark_for_remote_create_dir(&file.name, &file.meta())
                .await?;
            pass.tasks.push(Task::CreateRemoteDir(file.clone()));
            pass.summary.remote_dirs += 1;
        } else {
            self.store
                .mark_for_upload(&file.name, &file.meta())
                .await?;
            pass.tasks.push(Task::Upload(file.clone()));
            pass.summary.uploads += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRunner for SyncEngine {
    async fn run(&self, task: Task) {
        let kind = task.kind();
        let name = task.name().unwrap_or_default().to_string();
        debug!(task = kind, name = %name, "task started");
        let result = match task {
            Task::Reconcile => match self.reconcile().await {
                Ok(_) => Ok(()),
                Err(err) => {
                    self.queue.push(Task::Sleep);
                    self.queue.push(Task::Reconcile);
                    Err(err)
                }
            },
            Task::Sleep => Ok(()),
            Task::Download(file) => self.download(&file).await,
            Task::Upload(file) => self.upload(&file).await,
            Task::DeleteRemote(file) => self.delete_remote(&file).await,
            Task::DeleteLocal(file) => self.delete_local(&file).await,
            Task::CreateRemoteDir(file) => self.create_remote_dir(&file).await,
            Task::CreateLocalDir(file) => self.create_local_dir(&file).await,
        };
        if let Err(err) = result {
            warn!(task = kind, name = %name, error = %err, "task failed");
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
