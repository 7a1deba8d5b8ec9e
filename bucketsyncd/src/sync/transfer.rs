use std::io;
use std::path::{Path, PathBuf};

use bucketsync_core::{BucketClient, BucketError, FileEntry};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("bucket api error: {0}")]
    Bucket(#[from] BucketError),
    #[error("stream failed: {0}")]
    Stream(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Streams object bodies between the bucket API and local files.
#[derive(Clone)]
pub struct TransferClient {
    client: BucketClient,
}

impl TransferClient {
    pub fn new(client: BucketClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BucketClient {
        &self.client
    }

    /// Writes the object into a `.partial` sibling and renames it over
    /// `target` once the body is complete.
    pub async fn download_to_path(
        &self,
        bucket: &str,
        id: &str,
        target: &Path,
    ) -> Result<(), TransferError> {
        let response = self.client.open_download(bucket, id).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let result = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<(), TransferError>(())
        }
        .await;

        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }

    pub async fn upload_from_path(
        &self,
        bucket: &str,
        name: &str,
        source: &Path,
    ) -> Result<FileEntry, TransferError> {
        let file = tokio::fs::File::open(source).await?;
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        Ok(self.client.upload_file(bucket, name, body).await?)
    }
}

pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry_body(id: &str, name: &str, size: u64) -> String {
        format!(
            r#"{{"id":"{id}","filename":"{name}","created":"2024-03-01T10:00:00.000Z","size":{size}}}"#
        )
    }

    fn transfer_for(server: &MockServer) -> TransferClient {
        TransferClient::new(BucketClient::with_base_url(&server.uri(), "test-token").unwrap())
    }

    #[tokio::test]
    async fn downloads_file_to_target_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/buckets/b/files/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/out.txt");

        transfer_for(&server)
            .download_to_path("b", "f1", &target)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/buckets/b/files/f1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let err = transfer_for(&server)
            .download_to_path("b", "f1", &target)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Bucket(BucketError::Api { .. })));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn uploads_file_contents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/buckets/b/files"))
            .and(query_param("name", "Docs/in.bin"))
            .and(body_bytes(b"payload".to_vec()))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_raw(entry_body("up-1", "Docs/in.bin", 7), "application/json"),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();

        let entry = transfer_for(&server)
            .upload_from_path("b", "Docs/in.bin", &source)
            .await
            .unwrap();
        assert_eq!(entry.id, "up-1");
        assert_eq!(entry.size, 7);
    }

    #[test]
    fn partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/s/a.txt")),
            PathBuf::from("/s/a.txt.partial")
        );
        assert_eq!(
            partial_path(Path::new("/s/README")),
            PathBuf::from("/s/README.partial")
        );
    }
}
