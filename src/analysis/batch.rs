//! Batch-job variant: one request file, one asynchronous job, polled to completion.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::FailureKind;
use crate::gemini::wire::GenerateRequest;
use crate::gemini::{AnalysisService, GeminiError};
use crate::models::{AnalysisRecord, BatchEntry, BatchJob, BatchState, RemoteFile, SourceDocument};

/// MIME type of the uploaded request file.
pub const JSONL_MIME_TYPE: &str = "application/jsonl";

/// Reason recorded for documents the finished job did not mention.
pub const MISSING_FROM_OUTPUT: &str = "missing from batch output";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("batch service error: {0}")]
    Service(#[from] GeminiError),
    #[error("failed to write batch requests: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize batch request: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("batch job {job_id} not finished after {waited:?}")]
    TimedOut { job_id: String, waited: Duration },
    #[error("batch job {job_id} ended {state}: {message}")]
    Unsuccessful {
        job_id: String,
        state: BatchState,
        message: String,
    },
}

impl BatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BatchError::Service(e) => e.kind(),
            BatchError::Io(_) => FailureKind::LocalIo,
            BatchError::Serialize(_) => FailureKind::Malformed,
            BatchError::TimedOut { .. } => FailureKind::Transient,
            BatchError::Unsuccessful { .. } => FailureKind::Rejected,
        }
    }
}

/// One line of the request file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchRequest {
    pub key: String,
    pub request: GenerateRequest,
}

/// One request per uploaded file, keyed by the file's remote name.
pub fn build_batch_requests(files: &[RemoteFile], prompt: &str, mime_type: &str) -> Vec<BatchRequest> {
    files
        .iter()
        .map(|file| BatchRequest {
            key: file.name.clone(),
            request: GenerateRequest::prompt_with_file(
                prompt,
                &file.uri,
                Some(file.mime_type.as_deref().unwrap_or(mime_type)),
            ),
        })
        .collect()
}

pub fn to_jsonl(requests: &[BatchRequest]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for request in requests {
        out.push_str(&serde_json::to_string(request)?);
        out.push('\n');
    }
    Ok(out)
}

/// Write the request file to `path`, returning its bytes for upload.
pub fn write_jsonl(requests: &[BatchRequest], path: &Path) -> Result<Vec<u8>, BatchError> {
    let body = to_jsonl(requests)?.into_bytes();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &body)?;
    debug!("Wrote {} batch requests to {}", requests.len(), path.display());
    Ok(body)
}

/// A started job and the uploaded request file it reads from.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub job_id: String,
    pub requests_file: RemoteFile,
}

/// Upload the request file and start a job over it.
pub async fn submit_batch(
    service: &dyn AnalysisService,
    model: &str,
    requests: &[BatchRequest],
    requests_path: &Path,
    display_name: &str,
) -> Result<SubmittedBatch, BatchError> {
    let body = write_jsonl(requests, requests_path)?;
    let artifact = service
        .upload_file(body, &format!("{}-requests", display_name), JSONL_MIME_TYPE)
        .await?;
    let job_id = service
        .batch_create(model, &artifact.name, display_name)
        .await?;
    info!(
        "Submitted batch job {} with {} requests",
        job_id,
        requests.len()
    );
    Ok(SubmittedBatch {
        job_id,
        requests_file: artifact,
    })
}

/// Polls a batch job until it reaches a terminal state or the deadline passes.
pub struct BatchJobMonitor<'a> {
    service: &'a dyn AnalysisService,
    poll_interval: Duration,
    max_wait: Duration,
}

impl<'a> BatchJobMonitor<'a> {
    pub fn new(service: &'a dyn AnalysisService, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            service,
            poll_interval,
            max_wait,
        }
    }

    /// Wait for the job to finish and return it with its results.
    ///
    /// Fails with [`BatchError::TimedOut`] once `max_wait` has elapsed and with
    /// [`BatchError::Unsuccessful`] if the job ends in any state but Succeeded.
    /// Transient polling errors are logged and the poll is retried.
    pub async fn wait(&self, job_id: &str) -> Result<BatchJob, BatchError> {
        let started = Instant::now();
        let mut last_state: Option<BatchState> = None;

        loop {
            match self.service.batch_get(job_id).await {
                Ok(mut job) => {
                    if let Some(previous) = last_state {
                        if job.state.rank() < previous.rank() {
                            warn!(
                                "Batch {} reported {} after {}; ignoring regression",
                                job_id, job.state, previous
                            );
                            job.state = previous;
                        }
                    }
                    if last_state != Some(job.state) {
                        info!("Batch {} is {}", job_id, job.state);
                    }
                    last_state = Some(job.state);

                    if job.state.is_terminal() {
                        return self.finish(job).await;
                    }
                }
                Err(e) if e.kind().is_retryable() => {
                    warn!("Polling batch {} failed, will retry: {}", job_id, e);
                }
                Err(e) => return Err(e.into()),
            }

            let waited = started.elapsed();
            if waited + self.poll_interval > self.max_wait {
                return Err(BatchError::TimedOut {
                    job_id: job_id.to_string(),
                    waited,
                });
            }
            debug!("Batch {}: next poll in {:?}", job_id, self.poll_interval);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn finish(&self, mut job: BatchJob) -> Result<BatchJob, BatchError> {
        if job.state != BatchState::Succeeded {
            return Err(BatchError::Unsuccessful {
                job_id: job.job_id,
                state: job.state,
                message: job.error.unwrap_or_else(|| "no error reported".to_string()),
            });
        }
        job.results = self.service.batch_results(&job).await?;
        info!("Batch {} returned {} results", job.job_id, job.results.len());
        Ok(job)
    }
}

/// Map keyed batch results back onto the documents that produced them.
///
/// Returns one record per document, in document order.
pub fn records_from_batch(
    documents: &[(SourceDocument, RemoteFile)],
    results: Vec<BatchEntry>,
) -> Vec<AnalysisRecord> {
    let mut by_key: HashMap<String, Result<String, String>> = HashMap::new();
    for entry in results {
        if by_key.insert(entry.key.clone(), entry.outcome).is_some() {
            warn!("Batch output has duplicate key {}; keeping the last", entry.key);
        }
    }

    // Documents that collided on one remote file share its result.
    let records: Vec<AnalysisRecord> = documents
        .iter()
        .map(|(doc, file)| match by_key.get(&file.name) {
            Some(Ok(text)) => AnalysisRecord::ok(doc, text.clone()),
            Some(Err(reason)) => AnalysisRecord::failed(doc, reason.clone()),
            None => AnalysisRecord::failed(doc, MISSING_FROM_OUTPUT),
        })
        .collect();

    for key in by_key.keys() {
        if !documents.iter().any(|(_, file)| &file.name == key) {
            warn!("Batch output has result for unknown key {}", key);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(name: &str) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            display_name: format!("{}.pdf", name),
            uri: format!("https://files.example/{}", name),
            mime_type: None,
            state: None,
        }
    }

    #[test]
    fn test_build_batch_requests_keys_by_remote_name() {
        let requests = build_batch_requests(&[remote("files/a"), remote("files/b")], "Grade it", "application/pdf");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].key, "files/a");

        let line = serde_json::to_value(&requests[1]).unwrap();
        assert_eq!(line["key"], "files/b");
        let parts = &line["request"]["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Grade it");
        assert_eq!(parts[1]["file_data"]["file_uri"], "https://files.example/files/b");
        assert_eq!(parts[1]["file_data"]["mime_type"], "application/pdf");
    }

    #[test]
    fn test_to_jsonl_one_object_per_line() {
        let requests = build_batch_requests(&[remote("files/a"), remote("files/b")], "p", "application/pdf");
        let body = to_jsonl(&requests).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["key"].is_string());
        }
    }

    #[test]
    fn test_write_jsonl_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("batch_requests.jsonl");
        let requests = build_batch_requests(&[remote("files/a")], "p", "application/pdf");
        let bytes = write_jsonl(&requests, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_records_from_batch() {
        let docs = vec![
            (SourceDocument::new("1", "one.pdf", "f"), remote("files/a")),
            (SourceDocument::new("2", "two.pdf", "f"), remote("files/b")),
            (SourceDocument::new("3", "three.pdf", "f"), remote("files/c")),
        ];
        let results = vec![
            BatchEntry {
                key: "files/c".to_string(),
                outcome: Ok("third".to_string()),
            },
            BatchEntry {
                key: "files/a".to_string(),
                outcome: Err("blocked".to_string()),
            },
            BatchEntry {
                key: "files/zzz".to_string(),
                outcome: Ok("stray".to_string()),
            },
        ];

        let records = records_from_batch(&docs, results);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].source_name, "one.pdf");
        assert!(!records[0].is_ok());
        assert_eq!(records[1].status, crate::models::AnalysisStatus::Failed(MISSING_FROM_OUTPUT.to_string()));
        assert!(records[2].is_ok());
        assert_eq!(records[2].analysis_text, "third");
    }
}
