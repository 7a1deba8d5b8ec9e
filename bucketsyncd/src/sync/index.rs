use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection, migrate::Migrator};
use thiserror::Error;
use tokio::sync::Mutex;

use super::notifier::SyncNotifier;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SELECT_COLUMNS: &str =
    "SELECT name, remote_id, remote_created, remote_size, local_modified, local_size, state FROM sync_records";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid sync state: {0}")]
    InvalidState(String),
    #[error("state store is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Synced,
    ForDownload,
    ForUpload,
    ForLocalDelete,
    ForRemoteDelete,
    ForLocalCreateDir,
    ForRemoteCreateDir,
    DownloadFailed,
    UploadFailed,
    Conflict,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::ForDownload => "for_download",
            SyncState::ForUpload => "for_upload",
            SyncState::ForLocalDelete => "for_local_delete",
            SyncState::ForRemoteDelete => "for_remote_delete",
            SyncState::ForLocalCreateDir => "for_local_create_dir",
            SyncState::ForRemoteCreateDir => "for_remote_create_dir",
            SyncState::DownloadFailed => "download_failed",
            SyncState::UploadFailed => "upload_failed",
            SyncState::Conflict => "conflict",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "synced" => Ok(SyncState::Synced),
            "for_download" => Ok(SyncState::ForDownload),
            "for_upload" => Ok(SyncState::ForUpload),
            "for_local_delete" => Ok(SyncState::ForLocalDelete),
            "for_remote_delete" => Ok(SyncState::ForRemoteDelete),
            "for_local_create_dir" => Ok(SyncState::ForLocalCreateDir),
            "for_remote_create_dir" => Ok(SyncState::ForRemoteCreateDir),
            "download_failed" => Ok(SyncState::DownloadFailed),
            "upload_failed" => Ok(SyncState::UploadFailed),
            "conflict" => Ok(SyncState::Conflict),
            other => Err(StoreError::InvalidState(other.to_string())),
        }
    }

    pub fn is_synced(self) -> bool {
        self == SyncState::Synced
    }

    pub fn is_pending(self) -> bool {
        matches!(
            self,
            SyncState::ForDownload
                | SyncState::ForUpload
                | SyncState::ForLocalDelete
                | SyncState::ForRemoteDelete
                | SyncState::ForLocalCreateDir
                | SyncState::ForRemoteCreateDir
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, SyncState::DownloadFailed | SyncState::UploadFailed)
    }

    pub fn is_conflict(self) -> bool {
        self == SyncState::Conflict
    }
}

/// Remote half of a record as observed in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub id: String,
    pub created: i64,
    pub size: i64,
}

/// Local half of a record as observed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMeta {
    pub modified: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub name: String,
    pub remote_id: Option<String>,
    pub remote_created: i64,
    pub remote_size: i64,
    /// Zero means no local copy was ever recorded.
    pub local_modified: i64,
    pub local_size: i64,
    pub state: SyncState,
}

impl SyncRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let state: String = row.try_get("state")?;
        Ok(Self {
            name: row.try_get("name")?,
            remote_id: row.try_get("remote_id")?,
            remote_created: row.try_get("remote_created")?,
            remote_size: row.try_get("remote_size")?,
            local_modified: row.try_get("local_modified")?,
            local_size: row.try_get("local_size")?,
            state: SyncState::parse(&state)?,
        })
    }
}

struct StoreConn {
    conn: SqliteConnection,
    in_tx: bool,
    closed: bool,
}

impl StoreConn {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    async fn begin_if_needed(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        if !self.in_tx {
            sqlx::query("BEGIN IMMEDIATE")
                .execute(&mut self.conn)
                .await?;
            self.in_tx = true;
        }
        Ok(())
    }
}

/// Durable map from canonical name to [`SyncRecord`].
///
/// All access goes through one SQLite connection guarded by an async mutex.
/// Mutations open a transaction lazily; nothing is durable until
/// [`StateStore::commit`] returns.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StoreConn>>,
    notifier: Arc<dyn SyncNotifier>,
}

impl StateStore {
    pub async fn open(path: &Path, notifier: Arc<dyn SyncNotifier>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let conn = options.connect().await?;
        Self::from_connection(conn, notifier).await
    }

    pub async fn in_memory(notifier: Arc<dyn SyncNotifier>) -> Result<Self, StoreError> {
        let conn = SqliteConnection::connect("sqlite::memory:").await?;
        Self::from_connection(conn, notifier).await
    }

    pub async fn from_connection(
        mut conn: SqliteConnection,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Result<Self, StoreError> {
        MIGRATOR.run(&mut conn).await?;
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreConn {
                conn,
                in_tx: false,
                closed: false,
            })),
            notifier,
        })
    }

    pub async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StoreError> {
        let mut guard = self.inner.lock().await;
        guard.check_open()?;
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE name = ?1"))
            .bind(name)
            .fetch_optional(&mut guard.conn)
            .await?;
        row.as_ref().map(SyncRecord::from_row).transpose()
    }

    pub async fn contains(&self, name: &str) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock().await;
        guard.check_open()?;
        let row = sqlx::query("SELECT 1 FROM sync_records WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut guard.conn)
            .await?;
        Ok(row.is_some())
    }

    pub async fn all(&self) -> Result<Vec<SyncRecord>, StoreError> {
        let mut guard = self.inner.lock().await;
        guard.check_open()?;
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY name ASC"))
            .fetch_all(&mut guard.conn)
            .await?;
        rows.iter().map(SyncRecord::from_row).collect()
    }

    pub async fn size(&self) -> Result<usize, StoreError> {
        let mut guard = self.inner.lock().await;
        guard.check_open()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_records")
            .fetch_one(&mut guard.conn)
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.lock().await;
            guard.begin_if_needed().await?;
            sqlx::query("DELETE FROM sync_records WHERE name = ?1")
                .bind(name)
                .execute(&mut guard.conn)
                .await?;
        }
        self.notifier.path_changed(name, None);
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard.check_open()?;
        if guard.in_tx {
            sqlx::query("COMMIT").execute(&mut guard.conn).await?;
            guard.in_tx = false;
        }
        Ok(())
    }

    /// Discards every write since the last commit.
    pub async fn rollback(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard.check_open()?;
        if guard.in_tx {
            guard.in_tx = false;
            sqlx::query("ROLLBACK").execute(&mut guard.conn).await?;
        }
        Ok(())
    }

    /// Rolls back uncommitted work. Every later call fails with
    /// [`StoreError::Closed`].
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.closed {
            return Ok(());
        }
        guard.closed = true;
        if guard.in_tx {
            guard.in_tx = false;
            sqlx::query("ROLLBACK").execute(&mut guard.conn).await?;
        }
        Ok(())
    }

    pub async fn mark_synced(
        &self,
        name: &str,
        remote: &RemoteMeta,
        local: &LocalMeta,
    ) -> Result<(), StoreError> {
        self.write_full(name, Some(remote), local, SyncState::Synced)
            .await
    }

    pub async fn mark_conflict(
        &self,
        name: &str,
        remote: &RemoteMeta,
        local: &LocalMeta,
    ) -> Result<(), StoreError> {
        self.write_full(name, Some(remote), local, SyncState::Conflict)
            .await
    }

    pub async fn mark_for_download(&self, name: &str, remote: &RemoteMeta) -> Result<(), StoreError> {
        self.insert_remote_or_set_state(name, remote, SyncState::ForDownload)
            .await
    }

    pub async fn mark_for_local_create_dir(
        &self,
        name: &str,
        remote: &RemoteMeta,
    ) -> Result<(), StoreError> {
        self.insert_remote_or_set_state(name, remote, SyncState::ForLocalCreateDir)
            .await
    }

    /// Records a permanent download failure together with the remote
    /// metadata that failed, leaving the local half untouched.
    pub async fn mark_download_failed(
        &self,
        name: &str,
        remote: &RemoteMeta,
    ) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.lock().await;
            guard.begin_if_needed().await?;
            sqlx::query(
                "INSERT INTO sync_records (name, remote_id, remote_created, remote_size, local_modified, local_size, state)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     remote_id = excluded.remote_id,
                     remote_created = excluded.remote_created,
                     remote_size = excluded.remote_size,
                     state = excluded.state",
            )
            .bind(name)
            .bind(&remote.id)
            .bind(remote.created)
            .bind(remote.size)
            .bind(SyncState::DownloadFailed.as_str())
            .execute(&mut guard.conn)
            .await?;
        }
        self.notifier
            .path_changed(name, Some(SyncState::DownloadFailed));
        Ok(())
    }

    pub async fn mark_for_upload(&self, name: &str, local: &LocalMeta) -> Result<(), StoreError> {
        self.insert_local_or_set_state(name, local, SyncState::ForUpload)
            .await
    }

    pub async fn mark_for_remote_create_dir(
        &self,
        name: &str,
        local: &LocalMeta,
    ) -> Result<(), StoreError> {
        self.insert_local_or_set_state(name, local, SyncState::ForRemoteCreateDir)
            .await
    }

    /// Records a failed upload. The remote half is cleared because the
    /// previous remote copy was deleted before the upload started.
    pub async fn mark_upload_failed(&self, name: &str, local: &LocalMeta) -> Result<(), StoreError> {
        self.write_full(name, None, local, SyncState::UploadFailed)
            .await
    }

    pub async fn mark_for_remote_delete(&self, name: &str) -> Result<(), StoreError> {
        self.set_state(name, SyncState::ForRemoteDelete).await
    }

    pub async fn mark_for_local_delete(&self, name: &str) -> Result<(), StoreError> {
        self.set_state(name, SyncState::ForLocalDelete).await
    }

    async fn write_full(
        &self,
        name: &str,
        remote: Option<&RemoteMeta>,
        local: &LocalMeta,
        state: SyncState,
    ) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.lock().await;
            guard.begin_if_needed().await?;
            sqlx::query(
                "INSERT INTO sync_records (name, remote_id, remote_created, remote_size, local_modified, local_size, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(name) DO UPDATE SET
                     remote_id = excluded.remote_id,
                     remote_created = excluded.remote_created,
                     remote_size = excluded.remote_size,
                     local_modified = excluded.local_modified,
                     local_size = excluded.local_size,
                     state = excluded.state",
            )
            .bind(name)
            .bind(remote.map(|remote| remote.id.as_str()))
            .bind(remote.map_or(0, |remote| remote.created))
            .bind(remote.map_or(0, |remote| remote.size))
            .bind(local.modified)
            .bind(local.size)
            .bind(state.as_str())
            .execute(&mut guard.conn)
            .await?;
        }
        self.notifier.path_changed(name, Some(state));
        Ok(())
    }

    async fn insert_remote_or_set_state(
        &self,
        name: &str,
        remote: &RemoteMeta,
        state: SyncState,
    ) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.lock().await;
            guard.begin_if_needed().await?;
            sqlx::query(
                "INSERT INTO sync_records (name, remote_id, remote_created, remote_size, local_modified, local_size, state)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)
                 ON CONFLICT(name) DO UPDATE SET state = excluded.state",
            )
            .bind(name)
            .bind(&remote.id)
            .bind(remote.created)
            .bind(remote.size)
            .bind(state.as_str())
            .execute(&mut guard.conn)
            .await?;
        }
        self.notifier.path_changed(name, Some(state));
        Ok(())
    }

    async fn insert_local_or_set_state(
        &self,
        name: &str,
        local: &LocalMeta,
        state: SyncState,
    ) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.lock().await;
            guard.begin_if_needed().await?;
            sqlx::query(
                "INSERT INTO sync_records (name, remote_id, remote_created, remote_size, local_modified, local_size, state)
                 VALUES (?1, NULL, 0, 0, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET state = excluded.state",
            )
            .bind(name)
            .bind(local.modified)
            .bind(local.size)
            .bind(state.as_str())
            .execute(&mut guard.conn)
            .await?;
        }
        self.notifier.path_changed(name, Some(state));
        Ok(())
    }

    async fn set_state(&self, name: &str, state: SyncState) -> Result<(), StoreError> {
        let updated = {
            let mut guard = self.inner.lock().await;
            guard.begin_if_needed().await?;
            sqlx::query("UPDATE sync_records SET state = ?1 WHERE name = ?2")
                .bind(state.as_str())
                .bind(name)
                .execute(&mut guard.conn)
                .await?
                .rows_affected()
        };
        if updated > 0 {
            self.notifier.path_changed(name, Some(state));
        }
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("bucketsync");
    path.push("state.db");
    Ok(path)
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
