use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bucketsync_core::{BucketClient, BucketError, FileEntry};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::index::RemoteMeta;
use super::paths::split_remote_name;
use super::transfer::{TransferClient, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Temporary,
    Permanent,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote call failed ({kind:?}, code {code:?}): {message}")]
    Api {
        kind: RemoteErrorKind,
        code: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RemoteError {
    pub fn temporary(message: impl Into<String>) -> Self {
        RemoteError::Api {
            kind: RemoteErrorKind::Temporary,
            code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(code: Option<u16>, message: impl Into<String>) -> Self {
        RemoteError::Api {
            kind: RemoteErrorKind::Permanent,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            RemoteError::Api {
                kind: RemoteErrorKind::Temporary,
                ..
            }
        )
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            RemoteError::Api { code, .. } => *code,
            RemoteError::Io(_) => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Api { retry_after, .. } => *retry_after,
            RemoteError::Io(_) => None,
        }
    }
}

impl From<BucketError> for RemoteError {
    fn from(err: BucketError) -> Self {
        let kind = if err.is_retryable() {
            RemoteErrorKind::Temporary
        } else {
            RemoteErrorKind::Permanent
        };
        RemoteError::Api {
            kind,
            code: err.status().map(|status| status.as_u16()),
            retry_after: err.retry_after_secs().map(Duration::from_secs),
            message: err.to_string(),
        }
    }
}

impl From<TransferError> for RemoteError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Bucket(err) => err.into(),
            // A body that stops mid-stream is a connectivity problem.
            TransferError::Stream(err) => RemoteError::temporary(err.to_string()),
            TransferError::Io(err) => RemoteError::Io(err),
        }
    }
}

/// One object as reported by a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    /// Object name; directory placeholders end with `/`.
    pub name: String,
    /// ISO-8601 UTC with millisecond precision.
    pub created: String,
    pub size: u64,
    pub is_dir: bool,
    pub is_decrypted: bool,
}

impl From<FileEntry> for RemoteEntry {
    fn from(entry: FileEntry) -> Self {
        Self {
            is_dir: entry.is_directory(),
            id: entry.id,
            name: entry.filename,
            created: entry.created,
            size: entry.size,
            is_decrypted: entry.decrypted,
        }
    }
}

/// A listing entry with its name canonicalized and timestamp parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    /// Store key, without the trailing `/` of directories.
    pub name: String,
    pub created: i64,
    pub size: i64,
    pub is_dir: bool,
}

impl RemoteFile {
    pub fn from_entry(entry: &RemoteEntry) -> Result<Self, time::error::Parse> {
        let (key, is_dir) = split_remote_name(&entry.name);
        Ok(Self {
            id: entry.id.clone(),
            name: key.to_string(),
            created: parse_created_millis(&entry.created)?,
            size: entry.size.min(i64::MAX as u64) as i64,
            is_dir: is_dir || entry.is_dir,
        })
    }

    pub fn meta(&self) -> RemoteMeta {
        RemoteMeta {
            id: self.id.clone(),
            created: self.created,
            size: self.size,
        }
    }
}

pub fn parse_created_millis(value: &str) -> Result<i64, time::error::Parse> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)?;
    Ok((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

/// Object-storage primitives the sync engine runs against.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_entries(&self, bucket: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        source: &Path,
    ) -> Result<RemoteEntry, RemoteError>;

    /// Streams object `id` into `target`. Parent directories must exist.
    async fn download(&self, bucket: &str, id: &str, target: &Path) -> Result<(), RemoteError>;

    async fn delete(&self, bucket: &str, id: &str) -> Result<(), RemoteError>;

    /// Creates the empty placeholder object for directory `name`.
    async fn create_placeholder(&self, bucket: &str, name: &str)
    -> Result<RemoteEntry, RemoteError>;

    async fn find_entry(
        &self,
        bucket: &str,
        name: &str,
    ) -> Result<Option<RemoteEntry>, RemoteError> {
        Ok(self
            .list_entries(bucket)
            .await?
            .into_iter()
            .find(|entry| entry.name == name))
    }
}

/// [`RemoteStore`] backed by the bucket REST API.
#[derive(Clone)]
pub struct BucketRemote {
    transfer: TransferClient,
}

impl BucketRemote {
    pub fn new(client: BucketClient) -> Self {
        Self {
            transfer: TransferClient::new(client),
        }
    }
}

#[async_trait]
impl RemoteStore for BucketRemote {
    async fn list_entries(&self, bucket: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let files = self.transfer.client().list_files(bucket).await?;
        Ok(files.into_iter().map(RemoteEntry::from).collect())
    }

    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        source: &Path,
    ) -> Result<RemoteEntry, RemoteError> {
        let entry = self.transfer.upload_from_path(bucket, name, source).await?;
        Ok(entry.into())
    }

    async fn download(&self, bucket: &str, id: &str, target: &Path) -> Result<(), RemoteError> {
        self.transfer.download_to_path(bucket, id, target).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, id: &str) -> Result<(), RemoteError> {
        self.transfer.client().delete_file(bucket, id).await?;
        Ok(())
    }

    async fn create_placeholder(
        &self,
        bucket: &str,
        name: &str,
    ) -> Result<RemoteEntry, RemoteError> {
        let entry = self.transfer.client().create_directory(bucket, name).await?;
        Ok(entry.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(name: &str, created: &str) -> RemoteEntry {
        RemoteEntry {
            id: "id".into(),
            name: name.into(),
            created: created.into(),
            size: 10,
            is_dir: name.ends_with('/'),
            is_decrypted: true,
        }
    }

    #[test]
    fn parses_created_with_millisecond_precision() {
        assert_eq!(
            parse_created_millis("2024-01-01T00:00:00.123Z").unwrap(),
            1_704_067_200_123
        );
        assert!(parse_created_millis("yesterday").is_err());
    }

    #[test]
    fn directory_entries_lose_trailing_slash() {
        let file = RemoteFile::from_entry(&entry("Docs/Sub/", "2024-01-01T00:00:00.000Z")).unwrap();
        assert_eq!(file.name, "Docs/Sub");
        assert!(file.is_dir);
        assert_eq!(file.meta().created, 1_704_067_200_000);
    }

    #[test]
    fn local_io_errors_are_not_temporary() {
        let local = RemoteError::from(TransferError::Io(io::Error::other("disk full")));
        assert!(!local.is_temporary());
        assert!(matches!(local, RemoteError::Io(_)));
        assert!(RemoteError::temporary("reset").is_temporary());
        assert_eq!(RemoteError::permanent(Some(404), "gone").code(), Some(404));
    }

    #[tokio::test]
    async fn bucket_remote_maps_listing_and_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/buckets/b/files"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"[{"id":"d1","filename":"Docs/","created":"2024-01-01T00:00:00.000Z","size":0},
                    {"id":"f1","filename":"Docs/a.txt","created":"2024-01-01T00:00:00.000Z","size":3,"decrypted":false}]"#,
                "application/json",
            ))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/buckets/b/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/buckets/b/files/busy"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let remote = BucketRemote::new(BucketClient::with_base_url(&server.uri(), "t").unwrap());

        let entries = remote.list_entries("b").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert!(!entries[1].is_decrypted);

        let found = remote.find_entry("b", "Docs/").await.unwrap().unwrap();
        assert_eq!(found.id, "d1");
        assert!(remote.find_entry("b", "Docs").await.unwrap().is_none());

        let err = remote.delete("b", "gone").await.unwrap_err();
        assert!(!err.is_temporary());
        assert_eq!(err.code(), Some(404));

        let dir = tempdir().unwrap();
        let err = remote
            .download("b", "busy", &dir.path().join("busy"))
            .await
            .unwrap_err();
        assert!(err.is_temporary());
        assert_eq!(err.code(), Some(502));
    }
}
