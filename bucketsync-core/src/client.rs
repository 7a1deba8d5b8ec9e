use std::time::{Duration, SystemTime};

use reqwest::header::RETRY_AFTER;
use reqwest::{Body, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.bucketsync.invalid";

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
    #[error("base url cannot carry path segments")]
    BadBaseUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct BucketClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl BucketClient {
    pub fn new(token: impl Into<String>) -> Result<Self, BucketError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, BucketError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(BucketError::BadBaseUrl);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    pub async fn list_files(&self, bucket: &str) -> Result<Vec<FileEntry>, BucketError> {
        let url = self.files_endpoint(bucket, None)?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Streams `body` into a new object called `name`. The service replaces
    /// nothing: callers delete an existing object of the same name first.
    pub async fn upload_file(
        &self,
        bucket: &str,
        name: &str,
        body: impl Into<Body>,
    ) -> Result<FileEntry, BucketError> {
        let mut url = self.files_endpoint(bucket, None)?;
        url.query_pairs_mut().append_pair("name", name);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Directories are empty objects whose name ends with `/`.
    pub async fn create_directory(
        &self,
        bucket: &str,
        name: &str,
    ) -> Result<FileEntry, BucketError> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{name}/")
        };
        self.upload_file(bucket, &name, Vec::<u8>::new()).await
    }

    /// Returns the successful response so the caller can stream the body.
    pub async fn open_download(&self, bucket: &str, id: &str) -> Result<Response, BucketError> {
        let url = self.files_endpoint(bucket, Some(id))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    pub async fn delete_file(&self, bucket: &str, id: &str) -> Result<(), BucketError> {
        let url = self.files_endpoint(bucket, Some(id))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn files_endpoint(&self, bucket: &str, id: Option<&str>) -> Result<Url, BucketError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BucketError::BadBaseUrl)?;
            segments
                .pop_if_empty()
                .extend(["v1", "buckets", bucket, "files"]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, BucketError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: Response) -> BucketError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        BucketError::Api {
            status,
            body,
            retry_after,
        }
    }
}

impl BucketError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            BucketError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BucketError::Api { status, .. } => Some(*status),
            BucketError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            BucketError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            BucketError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY)
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(value: &str) -> Option<u64> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
            .as_secs(),
    )
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub id: String,
    pub filename: String,
    /// ISO-8601 UTC with millisecond precision.
    pub created: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default = "default_decrypted")]
    pub decrypted: bool,
}

fn default_decrypted() -> bool {
    true
}

impl FileEntry {
    pub fn is_directory(&self) -> bool {
        self.filename.ends_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::GATEWAY_TIMEOUT),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
        assert_eq!(
            classify_api_status(StatusCode::CONFLICT),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(parse_retry_after("7"), Some(7));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn files_endpoint_encodes_segments() {
        let client = BucketClient::with_base_url("http://localhost:9000/api/", "t").unwrap();
        let url = client.files_endpoint("b 1", Some("f/2")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/api/v1/buckets/b%201/files/f%2F2"
        );
    }

    #[test]
    fn trailing_slash_marks_directory() {
        let entry = FileEntry {
            id: "1".into(),
            filename: "Docs/".into(),
            created: "2024-01-01T00:00:00.000Z".into(),
            size: 0,
            mimetype: None,
            decrypted: true,
        };
        assert!(entry.is_directory());
    }
}
