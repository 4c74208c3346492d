//! Google Drive v3 storage backend.
//!
//! Provides:
//! - Paginated folder listing filtered by MIME type
//! - File metadata lookup by ID
//! - Ranged media downloads for chunked fetching

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::parse_api_error;
use crate::error::FailureKind;

/// Default Drive API endpoint.
pub const DEFAULT_DRIVE_ENDPOINT: &str = "https://www.googleapis.com/drive/v3";

/// Error types for Google Drive operations.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl DriveError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DriveError::Http { status, .. } => FailureKind::from_status(*status),
            DriveError::Transport(e) => FailureKind::from_reqwest(e),
            DriveError::Parse(_) => FailureKind::Malformed,
        }
    }
}

/// Information about a file in Google Drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A slice of a file's content.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// Full size of the file, when the backend reports it.
    pub total_size: Option<u64>,
}

/// Operations the pipeline needs from document storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// List one page of non-trashed files with `mime_type` directly under `folder_id`.
    async fn list_folder_page(
        &self,
        folder_id: &str,
        mime_type: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<FilePage, DriveError>;

    /// Fetch name and type of a single file.
    async fn get_metadata(&self, file_id: &str) -> Result<DriveFile, DriveError>;

    /// Download up to `len` bytes of a file starting at `offset`.
    async fn download_chunk(&self, file_id: &str, offset: u64, len: u64)
        -> Result<Chunk, DriveError>;
}

/// Drive REST client authenticated with an OAuth access token.
#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    endpoint: String,
    access_token: String,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DriveError> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (message, _) = parse_api_error(&body);
        Err(DriveError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl StorageBackend for DriveClient {
    async fn list_folder_page(
        &self,
        folder_id: &str,
        mime_type: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<FilePage, DriveError> {
        let query = format!(
            "'{}' in parents and mimeType = '{}' and trashed = false",
            folder_id.replace('\'', "\\'"),
            mime_type
        );
        let page_size = page_size.to_string();
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", "nextPageToken, files(id, name, mimeType)"),
            ("pageSize", page_size.as_str()),
            ("orderBy", "name"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response = self
            .client
            .get(format!("{}/files", self.endpoint))
            .header(AUTHORIZATION, self.bearer())
            .query(&params)
            .send()
            .await?;
        let response = Self::check(response).await?;

        response
            .json::<FilePage>()
            .await
            .map_err(|e| DriveError::Parse(e.to_string()))
    }

    async fn get_metadata(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.endpoint, file_id))
            .header(AUTHORIZATION, self.bearer())
            .query(&[("fields", "id, name, mimeType"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        let response = Self::check(response).await?;

        response
            .json::<DriveFile>()
            .await
            .map_err(|e| DriveError::Parse(e.to_string()))
    }

    async fn download_chunk(
        &self,
        file_id: &str,
        offset: u64,
        len: u64,
    ) -> Result<Chunk, DriveError> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.endpoint, file_id))
            .header(AUTHORIZATION, self.bearer())
            .header(RANGE, byte_range(offset, len))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;

        let status = response.status();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Asking past the end of the file: nothing left to read.
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Chunk {
                bytes: Vec::new(),
                total_size: content_range.as_deref().and_then(parse_content_range_total),
            });
        }

        let response = Self::check(response).await?;
        let bytes = response.bytes().await?.to_vec();

        let total_size = match status {
            StatusCode::PARTIAL_CONTENT => {
                content_range.as_deref().and_then(parse_content_range_total)
            }
            // Server ignored the range and sent the whole file.
            _ if offset == 0 => Some(bytes.len() as u64),
            _ => None,
        };

        debug!(
            "Downloaded {} bytes of {} at offset {} (total: {:?})",
            bytes.len(),
            file_id,
            offset,
            total_size
        );

        Ok(Chunk { bytes, total_size })
    }
}

/// Parse the total length from a `Content-Range` header.
///
/// Handles `bytes 0-99/1234` and `bytes */1234`; returns None for `*` totals.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

/// Inclusive `Range` header value for `len` bytes starting at `offset`.
fn byte_range(offset: u64, len: u64) -> String {
    let end = offset.saturating_add(len.max(1) - 1);
    format!("bytes={}-{}", offset, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range() {
        assert_eq!(byte_range(0, 4), "bytes=0-3");
        assert_eq!(byte_range(8, 0), "bytes=8-8");
        assert_eq!(byte_range(1024, u64::MAX), format!("bytes=1024-{}", u64::MAX));
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-99/1234"), Some(1234));
        assert_eq!(parse_content_range_total("bytes */5000"), Some(5000));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_file_page_deserializes() {
        let json = r#"{
            "nextPageToken": "tok",
            "files": [{"id": "a1", "name": "x.pdf", "mimeType": "application/pdf"}]
        }"#;
        let page: FilePage = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("tok"));
        assert_eq!(page.files[0].name, "x.pdf");

        let empty: FilePage = serde_json::from_str("{}").unwrap();
        assert!(empty.files.is_empty());
        assert!(empty.next_page_token.is_none());
    }

    #[test]
    fn test_error_kind() {
        let err = DriveError::Http {
            status: 404,
            message: "File not found".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Rejected);
        assert_eq!(
            DriveError::Parse("bad".to_string()).kind(),
            FailureKind::Malformed
        );
    }
}
