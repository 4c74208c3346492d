//! REST implementation of [`AnalysisService`] for the Gemini API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::wire::{
    BatchResultLine, FileResource, GenerateRequest, GenerateResponse, ListFilesResponse,
    UploadResponse,
};
use super::{AnalysisService, GeminiError, RemoteFilePage};
use crate::google::parse_api_error;
use crate::models::{BatchEntry, BatchJob, BatchState, RemoteFile};
use crate::retry::parse_retry_after;

/// Default Gemini API endpoint.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

const API_KEY_HEADER: &str = "x-goog-api-key";
const LIST_PAGE_SIZE: &str = "100";

/// Gemini REST client authenticated with an API key.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeminiError> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.api_key)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn check(response: Response) -> Result<Response, GeminiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();
        let (message, api_status) = parse_api_error(&body);
        Err(GeminiError::Api {
            status: status.as_u16(),
            message,
            api_status,
            retry_after,
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, GeminiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GeminiError::Parse(e.to_string()))
    }
}

/// `gemini-2.5-flash` and `models/gemini-2.5-flash` both address the same model.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn batch_path(job_id: &str) -> String {
    if job_id.starts_with("batches/") {
        job_id.to_string()
    } else {
        format!("batches/{}", job_id)
    }
}

/// Interpret a batch resource or the long-running operation wrapping it.
///
/// The job's fields live under `metadata` on operations and at the top level
/// on bare batch resources; both are accepted.
pub(crate) fn parse_batch_job(job_id: &str, value: &Value) -> Result<BatchJob, GeminiError> {
    let metadata = value.get("metadata").unwrap_or(value);
    let error = value
        .get("error")
        .or_else(|| metadata.get("error"))
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        });

    let state = match metadata.get("state").and_then(Value::as_str) {
        Some(raw) => BatchState::from_api(raw)
            .ok_or_else(|| GeminiError::Parse(format!("unknown batch state: {}", raw)))?,
        None if value.get("done").and_then(Value::as_bool) == Some(true) => {
            if error.is_some() {
                BatchState::Failed
            } else {
                BatchState::Succeeded
            }
        }
        None => BatchState::Queued,
    };

    let output_file = [
        metadata.pointer("/output/responsesFile"),
        value.pointer("/response/responsesFile"),
        value.pointer("/response/output/responsesFile"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(str::to_string);

    let mut job = BatchJob::new(job_id, state);
    job.output_file = output_file;
    job.error = error;
    Ok(job)
}

/// Parse a JSONL results file into keyed entries. Blank lines are skipped.
///
/// A line that does not parse costs only its own document: it becomes a
/// failed entry when its key can still be read, and is dropped otherwise.
pub(crate) fn parse_batch_results(body: &str) -> Vec<BatchEntry> {
    let mut entries = Vec::new();
    for (index, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: BatchResultLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                let key = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("key").and_then(Value::as_str).map(str::to_string));
                match key {
                    Some(key) => {
                        warn!("Unreadable result for {} on line {}: {}", key, index + 1, e);
                        entries.push(BatchEntry {
                            key,
                            outcome: Err(format!("unreadable batch result: {}", e)),
                        });
                    }
                    None => warn!("Skipping unreadable results line {}: {}", index + 1, e),
                }
                continue;
            }
        };
        let outcome = match (parsed.response, parsed.error) {
            (_, Some(error)) => Err(error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string())),
            (Some(response), None) => response.into_text(),
            (None, None) => Err("entry has neither response nor error".to_string()),
        };
        entries.push(BatchEntry {
            key: parsed.key,
            outcome,
        });
    }
    entries
}

#[async_trait]
impl AnalysisService for GeminiClient {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        // Resumable protocol: open a session, then send everything in one go.
        let start = self
            .authed(
                self.client
                    .post(format!("{}/upload/v1beta/files", self.endpoint)),
            )
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = Self::check(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| GeminiError::Parse("missing x-goog-upload-url header".to_string()))?;

        debug!("Uploading {} bytes as {}", bytes.len(), display_name);

        let finished = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header(CONTENT_TYPE, HeaderValue::from_str(mime_type).map_err(|e| {
                GeminiError::Parse(format!("invalid MIME type {}: {}", mime_type, e))
            })?)
            .body(bytes)
            .send()
            .await?;
        let finished = Self::check(finished).await?;

        let uploaded: UploadResponse = Self::json(finished).await?;
        Ok(uploaded.file.into())
    }

    async fn list_files(&self, page_token: Option<&str>) -> Result<RemoteFilePage, GeminiError> {
        let mut params = vec![("pageSize", LIST_PAGE_SIZE)];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let response = self
            .authed(self.client.get(self.api_url("files")))
            .query(&params)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let page: ListFilesResponse = Self::json(response).await?;
        Ok(RemoteFilePage {
            files: page.files.into_iter().map(RemoteFile::from).collect(),
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, GeminiError> {
        let response = self
            .authed(self.client.get(self.api_url(name)))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let file: FileResource = Self::json(response).await?;
        Ok(file.into())
    }

    async fn delete_file(&self, name: &str) -> Result<(), GeminiError> {
        let response = self
            .authed(self.client.delete(self.api_url(name)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        file_uri: &str,
        mime_type: &str,
    ) -> Result<String, GeminiError> {
        let request = GenerateRequest::prompt_with_file(prompt, file_uri, Some(mime_type));
        let url = self.api_url(&format!("{}:generateContent", model_path(model)));

        let response = self
            .authed(self.client.post(url))
            .json(&request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let generated: GenerateResponse = Self::json(response).await?;
        generated.into_text().map_err(GeminiError::EmptyResponse)
    }

    async fn batch_create(
        &self,
        model: &str,
        requests_file: &str,
        display_name: &str,
    ) -> Result<String, GeminiError> {
        let url = self.api_url(&format!("{}:batchGenerateContent", model_path(model)));
        let body = json!({
            "batch": {
                "display_name": display_name,
                "input_config": { "file_name": requests_file },
            }
        });

        let response = self
            .authed(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let created: Value = Self::json(response).await?;
        created
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GeminiError::Parse("batch response has no name".to_string()))
    }

    async fn batch_get(&self, job_id: &str) -> Result<BatchJob, GeminiError> {
        let response = self
            .authed(self.client.get(self.api_url(&batch_path(job_id))))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let value: Value = Self::json(response).await?;
        parse_batch_job(job_id, &value)
    }

    async fn batch_results(&self, job: &BatchJob) -> Result<Vec<BatchEntry>, GeminiError> {
        let file = job.output_file.as_deref().ok_or_else(|| {
            GeminiError::Parse(format!("batch {} has no responses file", job.job_id))
        })?;
        let url = format!("{}/download/v1beta/{}:download", self.endpoint, file);

        let response = self
            .authed(self.client.get(url))
            .query(&[("alt", "media")])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body = response.text().await?;
        Ok(parse_batch_results(&body))
    }
}
