//! In-memory fakes of the storage, spreadsheet and analysis backends.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use drivelens::gemini::{AnalysisService, GeminiError, RemoteFilePage};
use drivelens::google::{
    Chunk, DriveError, DriveFile, FilePage, SheetCell, SheetsError, SpreadsheetBackend,
    StorageBackend,
};
use drivelens::models::{BatchEntry, BatchJob, BatchState, RemoteFile};
use drivelens::pipeline::PipelineOptions;
use drivelens::retry::RetryPolicy;
use drivelens::upload::DedupKey;

pub const PDF_MAGIC: &[u8] = b"%PDF-1.4\n";

pub fn pdf_bytes(body: &str) -> Vec<u8> {
    let mut bytes = PDF_MAGIC.to_vec();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

fn not_found(what: &str) -> DriveError {
    DriveError::Http {
        status: 404,
        message: format!("{} not found", what),
    }
}

/// A Drive with folders of files held in memory.
#[derive(Default)]
pub struct FakeDrive {
    files: HashMap<String, (String, Vec<u8>)>,
    folders: HashMap<String, Vec<String>>,
    broken_downloads: HashSet<String>,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, folder: &str, id: &str, name: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(id.to_string(), (name.to_string(), bytes));
        self.folders
            .entry(folder.to_string())
            .or_default()
            .push(id.to_string());
        self
    }

    /// Downloads of `id` fail with a 500.
    pub fn with_broken_download(mut self, id: &str) -> Self {
        self.broken_downloads.insert(id.to_string());
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageBackend for FakeDrive {
    async fn list_folder_page(
        &self,
        folder_id: &str,
        _mime_type: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<FilePage, DriveError> {
        let ids = self.folders.get(folder_id).ok_or_else(|| not_found(folder_id))?;
        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + page_size as usize).min(ids.len());
        let files = ids[start..end]
            .iter()
            .map(|id| DriveFile {
                id: id.clone(),
                name: self.files[id].0.clone(),
                mime_type: "application/pdf".to_string(),
            })
            .collect();
        Ok(FilePage {
            files,
            next_page_token: (end < ids.len()).then(|| end.to_string()),
        })
    }

    async fn get_metadata(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let (name, _) = self.files.get(file_id).ok_or_else(|| not_found(file_id))?;
        Ok(DriveFile {
            id: file_id.to_string(),
            name: name.clone(),
            mime_type: "application/pdf".to_string(),
        })
    }

    async fn download_chunk(&self, file_id: &str, offset: u64, len: u64) -> Result<Chunk, DriveError> {
        self.downloads.lock().unwrap().push(file_id.to_string());
        if self.broken_downloads.contains(file_id) {
            return Err(DriveError::Http {
                status: 500,
                message: "backend error".to_string(),
            });
        }
        let (_, bytes) = self.files.get(file_id).ok_or_else(|| not_found(file_id))?;
        let start = (offset as usize).min(bytes.len());
        let end = (start + len as usize).min(bytes.len());
        Ok(Chunk {
            bytes: bytes[start..end].to_vec(),
            total_size: Some(bytes.len() as u64),
        })
    }
}

/// A spreadsheet with one fixed grid of cells.
#[derive(Default)]
pub struct FakeSheets {
    pub cells: Vec<Vec<SheetCell>>,
    pub writes: Mutex<Vec<(String, Vec<Vec<String>>)>>,
    pub clears: Mutex<Vec<String>>,
}

#[async_trait]
impl SpreadsheetBackend for FakeSheets {
    async fn read_range(
        &self,
        _spreadsheet_id: &str,
        _range: &str,
    ) -> Result<Vec<Vec<SheetCell>>, SheetsError> {
        Ok(self.cells.clone())
    }

    async fn write_range(
        &self,
        _spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<(), SheetsError> {
        self.writes.lock().unwrap().push((range.to_string(), rows));
        Ok(())
    }

    async fn clear_range(&self, _spreadsheet_id: &str, range: &str) -> Result<(), SheetsError> {
        self.clears.lock().unwrap().push(range.to_string());
        Ok(())
    }
}

pub fn api_error(status: u16) -> GeminiError {
    GeminiError::Api {
        status,
        message: format!("status {}", status),
        api_status: None,
        retry_after: None,
    }
}

/// An analysis service that keeps files in memory and answers every prompt
/// with `analysis of <display name>`.
#[derive(Default)]
pub struct FakeGemini {
    files: Mutex<Vec<RemoteFile>>,
    next_id: Mutex<u32>,
    /// Display names whose analysis fails with this HTTP status.
    failing: HashMap<String, u16>,
    batch_states: Mutex<VecDeque<BatchState>>,
    pub uploads: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub generate_calls: Mutex<u32>,
    pub batch_polls: Mutex<u32>,
}

impl FakeGemini {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, display_name: &str, status: u16) -> Self {
        self.failing.insert(display_name.to_string(), status);
        self
    }

    /// States reported by successive `batch_get` calls; the last one repeats.
    pub fn with_batch_states(self, states: &[BatchState]) -> Self {
        *self.batch_states.lock().unwrap() = states.iter().copied().collect();
        self
    }

    /// A file left on the service by an earlier run, in the given state.
    /// `PROCESSING` files turn `ACTIVE` the next time they are fetched.
    pub fn with_stored(self, display_name: &str, state: &str) -> Self {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.files.lock().unwrap().push(RemoteFile {
            name: format!("files/f{}", id),
            display_name: display_name.to_string(),
            uri: format!("https://files.test/f{}", id),
            mime_type: Some("application/pdf".to_string()),
            state: Some(state.to_string()),
        });
        self
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn stored(&self) -> Vec<RemoteFile> {
        self.files.lock().unwrap().clone()
    }

    fn answer(&self, display_name: &str) -> Result<String, GeminiError> {
        match self.failing.get(display_name) {
            Some(status) => Err(api_error(*status)),
            None => Ok(format!("analysis of {}", display_name)),
        }
    }
}

#[async_trait]
impl AnalysisService for FakeGemini {
    async fn upload_file(
        &self,
        _bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        let file = RemoteFile {
            name: format!("files/f{}", id),
            display_name: display_name.to_string(),
            uri: format!("https://files.test/f{}", id),
            mime_type: Some(mime_type.to_string()),
            state: Some("ACTIVE".to_string()),
        };
        self.uploads.lock().unwrap().push(display_name.to_string());
        self.files.lock().unwrap().push(file.clone());
        Ok(file)
    }

    async fn list_files(&self, page_token: Option<&str>) -> Result<RemoteFilePage, GeminiError> {
        // Two files per page to exercise paging.
        let files = self.files.lock().unwrap().clone();
        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + 2).min(files.len());
        Ok(RemoteFilePage {
            files: files[start..end].to_vec(),
            next_page_token: (end < files.len()).then(|| end.to_string()),
        })
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, GeminiError> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| api_error(404))?;
        if file.state.as_deref() == Some("PROCESSING") {
            file.state = Some("ACTIVE".to_string());
        }
        Ok(file.clone())
    }

    async fn delete_file(&self, name: &str) -> Result<(), GeminiError> {
        let mut files = self.files.lock().unwrap();
        let before = files.len();
        files.retain(|f| f.name != name);
        if files.len() == before {
            return Err(api_error(404));
        }
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn generate_content(
        &self,
        _model: &str,
        _prompt: &str,
        file_uri: &str,
        _mime_type: &str,
    ) -> Result<String, GeminiError> {
        *self.generate_calls.lock().unwrap() += 1;
        let display_name = self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.uri == file_uri)
            .map(|f| f.display_name.clone())
            .ok_or_else(|| api_error(404))?;
        self.answer(&display_name)
    }

    async fn batch_create(
        &self,
        _model: &str,
        _requests_file: &str,
        _display_name: &str,
    ) -> Result<String, GeminiError> {
        Ok("batches/job1".to_string())
    }

    async fn batch_get(&self, job_id: &str) -> Result<BatchJob, GeminiError> {
        *self.batch_polls.lock().unwrap() += 1;
        let mut states = self.batch_states.lock().unwrap();
        let state = if states.len() > 1 {
            states.pop_front().unwrap_or(BatchState::Succeeded)
        } else {
            states.front().copied().unwrap_or(BatchState::Succeeded)
        };
        let mut job = BatchJob::new(job_id, state);
        if state == BatchState::Failed {
            job.error = Some("internal error".to_string());
        }
        Ok(job)
    }

    async fn batch_results(&self, _job: &BatchJob) -> Result<Vec<BatchEntry>, GeminiError> {
        let files = self.files.lock().unwrap().clone();
        Ok(files
            .iter()
            .filter(|f| f.mime_type.as_deref() != Some("application/jsonl"))
            .map(|f| BatchEntry {
                key: f.name.clone(),
                outcome: self.answer(&f.display_name).map_err(|e| e.to_string()),
            })
            .collect())
    }
}

/// Options for fast, quiet test runs writing under `dir`.
pub fn options(dir: &Path) -> PipelineOptions {
    PipelineOptions {
        prompt: "Analyze this document.".to_string(),
        model: "gemini-test".to_string(),
        mime_type: "application/pdf".to_string(),
        dedup_key: DedupKey::DisplayName,
        list_existing: true,
        delete_after_analysis: false,
        extract_identity: false,
        retry: RetryPolicy::immediate(),
        chunk_size: 4,
        page_size: 2,
        activation_poll: Duration::from_millis(10),
        activation_timeout: Duration::from_secs(1),
        batch_poll_interval: Duration::from_secs(30),
        batch_max_wait: Duration::from_secs(3600),
        batch_display_name: "test-batch".to_string(),
        batch_requests_path: dir.join("batch_requests.jsonl"),
        show_progress: false,
    }
}

/// A folder `F` holding three small PDFs.
pub fn three_pdf_drive() -> FakeDrive {
    FakeDrive::new()
        .with_file("F", "id1", "one.pdf", pdf_bytes("first"))
        .with_file("F", "id2", "two.pdf", pdf_bytes("second"))
        .with_file("F", "id3", "three.pdf", pdf_bytes("third"))
}
