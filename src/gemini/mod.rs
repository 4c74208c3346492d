//! Gemini analysis service: file store, content generation and batch jobs.
//!
//! The pipeline talks to the service through [`AnalysisService`] so tests can
//! substitute an in-memory fake. [`GeminiClient`] is the REST implementation.

mod client;
pub mod wire;

pub use client::{GeminiClient, DEFAULT_GEMINI_ENDPOINT};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::FailureKind;
use crate::models::{BatchEntry, BatchJob, RemoteFile};

#[derive(Error, Debug)]
pub enum GeminiError {
    #[error("Gemini API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Canonical status name, e.g. `RESOURCE_EXHAUSTED`.
        api_status: Option<String>,
        retry_after: Option<Duration>,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Parse(String),
    /// The call succeeded but produced no usable text.
    #[error("no text in response: {0}")]
    EmptyResponse(String),
}

impl GeminiError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GeminiError::Api {
                status, api_status, ..
            } => {
                if api_status.as_deref() == Some("RESOURCE_EXHAUSTED") {
                    FailureKind::Quota
                } else {
                    FailureKind::from_status(*status)
                }
            }
            GeminiError::Transport(e) => FailureKind::from_reqwest(e),
            GeminiError::Parse(_) | GeminiError::EmptyResponse(_) => FailureKind::Malformed,
        }
    }

    /// Server-provided wait hint, when one came with the error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GeminiError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// One page of the service's file listing.
#[derive(Debug, Clone, Default)]
pub struct RemoteFilePage {
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

/// Operations the pipeline needs from the analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Upload bytes under `display_name`; returns the service's handle.
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError>;

    async fn list_files(&self, page_token: Option<&str>) -> Result<RemoteFilePage, GeminiError>;

    /// Look up a single file by its `files/...` name.
    async fn get_file(&self, name: &str) -> Result<RemoteFile, GeminiError>;

    async fn delete_file(&self, name: &str) -> Result<(), GeminiError>;

    /// Run `prompt` against the referenced file and return the generated text.
    async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        file_uri: &str,
        mime_type: &str,
    ) -> Result<String, GeminiError>;

    /// Start a batch job over an uploaded JSONL request file; returns the job id.
    async fn batch_create(
        &self,
        model: &str,
        requests_file: &str,
        display_name: &str,
    ) -> Result<String, GeminiError>;

    /// Current state of a batch job. `results` is left empty.
    async fn batch_get(&self, job_id: &str) -> Result<BatchJob, GeminiError>;

    /// Keyed results of a succeeded batch job.
    async fn batch_results(&self, job: &BatchJob) -> Result<Vec<BatchEntry>, GeminiError>;
}
