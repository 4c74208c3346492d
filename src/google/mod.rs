//! Google Workspace backends: Drive for documents, Sheets for link lists.
//!
//! Both speak plain REST with a bearer token. Acquiring and refreshing that
//! token is someone else's job; we are handed an opaque string.

pub mod drive;
pub mod sheets;

pub use drive::{Chunk, DriveClient, DriveError, DriveFile, FilePage, StorageBackend};
pub use sheets::{SheetCell, SheetsClient, SheetsError, SpreadsheetBackend};

use serde::Deserialize;

/// Error envelope shared by Google JSON APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    /// Canonical status name, e.g. `RESOURCE_EXHAUSTED`.
    #[serde(default)]
    pub status: Option<String>,
}

/// Pull a readable message and canonical status out of an error body.
///
/// Falls back to the raw body when it is not the usual envelope.
pub(crate) fn parse_api_error(body: &str) -> (String, Option<String>) {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (body.trim().chars().take(500).collect(), None),
    }
}
