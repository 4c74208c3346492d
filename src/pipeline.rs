//! The end-to-end run: resolve sources, upload, analyze, record.
//!
//! Documents are processed strictly one after another. Every resolved
//! document ends up either as a record in the [`ResultStore`] or logged as
//! skipped, and the [`RunSummary`] checks that accounting at the end.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::analysis::{
    build_batch_requests, records_from_batch, submit_batch, AnalysisInvoker, BatchError,
    BatchJobMonitor,
};
use crate::config::{Config, ConfigError};
use crate::error::{Stage, StepError};
use crate::fetch::ContentFetcher;
use crate::gemini::AnalysisService;
use crate::google::{SpreadsheetBackend, StorageBackend};
use crate::identity::extract_identity;
use crate::models::{AnalysisRecord, RemoteFile, SourceDocument, StudentIdentity};
use crate::retry::RetryPolicy;
use crate::sources::{SourceError, SourceResolver, SourceSpec};
use crate::store::ResultStore;
use crate::upload::{DedupKey, RemoteRegistry, UploadOutcome, Uploader};

/// Errors that end a run early.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not resolve sources: {0}")]
    Source(#[from] SourceError),
    #[error("batch job failed: {0}")]
    Batch(#[from] BatchError),
}

/// Settings for one run, taken from [`Config`] at startup.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub prompt: String,
    pub model: String,
    pub mime_type: String,
    pub dedup_key: DedupKey,
    pub list_existing: bool,
    pub delete_after_analysis: bool,
    pub extract_identity: bool,
    pub retry: RetryPolicy,
    pub chunk_size: u64,
    pub page_size: u32,
    pub activation_poll: Duration,
    pub activation_timeout: Duration,
    pub batch_poll_interval: Duration,
    pub batch_max_wait: Duration,
    pub batch_display_name: String,
    pub batch_requests_path: PathBuf,
    pub show_progress: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            prompt: config.prompt_text()?,
            model: config.gemini.model.clone(),
            mime_type: config.source.mime_type.clone(),
            dedup_key: config.dedup_key,
            list_existing: config.list_existing,
            delete_after_analysis: config.delete_after_analysis,
            extract_identity: config.extract_identity,
            retry: config.retry.clone(),
            chunk_size: config.google.chunk_size,
            page_size: config.google.page_size,
            activation_poll: Duration::from_secs(2),
            activation_timeout: Duration::from_secs(config.gemini.activation_timeout_secs),
            batch_poll_interval: config.batch.poll_interval(),
            batch_max_wait: config.batch.max_wait(),
            batch_display_name: config.batch.display_name.clone(),
            batch_requests_path: config.batch_requests_path(),
            show_progress: true,
        })
    }
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub resolved: usize,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub uploaded: usize,
    pub reused: usize,
}

impl RunSummary {
    /// Whether every resolved document was recorded or skipped.
    pub fn is_balanced(&self) -> bool {
        self.resolved == self.ok + self.failed + self.skipped
    }

    fn check(&self) {
        if !self.is_balanced() {
            error!(
                "Accounting mismatch: {} resolved but {} ok + {} failed + {} skipped",
                self.resolved, self.ok, self.failed, self.skipped
            );
        }
    }

    fn record(&mut self, record: &AnalysisRecord) {
        if record.is_ok() {
            self.ok += 1;
        } else {
            self.failed += 1;
        }
    }

    fn count_upload(&mut self, outcome: &UploadOutcome) {
        if outcome.was_uploaded() {
            self.uploaded += 1;
        } else {
            self.reused += 1;
        }
    }
}

/// A document that made it to the analysis service.
struct Prepared {
    doc: SourceDocument,
    student: Option<StudentIdentity>,
    file: RemoteFile,
}

pub struct Pipeline<'a> {
    storage: &'a dyn StorageBackend,
    sheets: Option<&'a dyn SpreadsheetBackend>,
    service: &'a dyn AnalysisService,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        storage: &'a dyn StorageBackend,
        service: &'a dyn AnalysisService,
        options: PipelineOptions,
    ) -> Self {
        Self {
            storage,
            sheets: None,
            service,
            options,
        }
    }

    pub fn with_sheets(mut self, sheets: &'a dyn SpreadsheetBackend) -> Self {
        self.sheets = Some(sheets);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Resolve a source into documents.
    pub async fn resolve(&self, spec: &SourceSpec) -> Result<Vec<SourceDocument>, SourceError> {
        let mut resolver = SourceResolver::new(self.storage, self.options.mime_type.clone())
            .with_page_size(self.options.page_size);
        if let Some(sheets) = self.sheets {
            resolver = resolver.with_sheets(sheets);
        }
        resolver.resolve(spec).await
    }

    /// Analyze every document with one call each, appending to `store` as
    /// results come in.
    pub async fn run(
        &self,
        spec: &SourceSpec,
        store: &mut ResultStore,
    ) -> Result<RunSummary, PipelineError> {
        let documents = self.resolve(spec).await?;
        let mut summary = RunSummary {
            resolved: documents.len(),
            ..RunSummary::default()
        };

        let mut uploader = self.uploader().await;
        let mut invoker =
            AnalysisInvoker::new(self.service, self.options.model.clone(), self.options.retry.clone());
        let progress = self.progress(documents.len());

        for doc in &documents {
            progress.set_message(doc.display_name.clone());
            let student = match self.student(doc) {
                Ok(student) => student,
                Err(step) => {
                    self.skip(doc, &step, &mut summary);
                    progress.inc(1);
                    continue;
                }
            };

            let record = match self.prepare(doc, &mut uploader, &mut summary).await {
                Ok(file) => {
                    let record = match invoker.analyze(&file, &self.options.prompt).await {
                        Ok(text) => AnalysisRecord::ok(doc, text),
                        Err(e) => {
                            let step = StepError::new(Stage::Analyze, e.kind(), e.to_string());
                            warn!("{}: {}", doc, step);
                            AnalysisRecord::failed(doc, step.to_string())
                        }
                    };
                    if self.options.delete_after_analysis {
                        self.cleanup(&mut uploader, &file).await;
                    }
                    record
                }
                Err(step) if step.stage.is_before_upload() => {
                    self.skip(doc, &step, &mut summary);
                    progress.inc(1);
                    continue;
                }
                Err(step) => {
                    warn!("{}: {}", doc, step);
                    AnalysisRecord::failed(doc, step.to_string())
                }
            };

            summary.record(&record);
            self.save(store, record.with_student(student));
            progress.inc(1);
        }

        progress.finish_and_clear();
        self.flush(store);
        summary.check();
        info!(
            "Run finished: {} ok, {} failed, {} skipped of {} ({} uploaded, {} reused)",
            summary.ok, summary.failed, summary.skipped, summary.resolved, summary.uploaded, summary.reused
        );
        Ok(summary)
    }

    /// Upload every document, then analyze them all in one batch job.
    ///
    /// Upload failures are recorded as they happen. If the job itself does not
    /// succeed, the error is returned and no records are written for it.
    pub async fn run_batch(
        &self,
        spec: &SourceSpec,
        store: &mut ResultStore,
    ) -> Result<RunSummary, PipelineError> {
        let documents = self.resolve(spec).await?;
        let mut summary = RunSummary {
            resolved: documents.len(),
            ..RunSummary::default()
        };

        let mut uploader = self.uploader().await;
        let progress = self.progress(documents.len());
        let mut prepared: Vec<Prepared> = Vec::new();

        for doc in &documents {
            progress.set_message(doc.display_name.clone());
            let result = match self.student(doc) {
                Ok(student) => self
                    .prepare(doc, &mut uploader, &mut summary)
                    .await
                    .map(|file| (student, file)),
                Err(step) => Err(step),
            };
            match result {
                Ok((student, file)) => prepared.push(Prepared {
                    doc: doc.clone(),
                    student,
                    file,
                }),
                Err(step) if step.stage.is_before_upload() => self.skip(doc, &step, &mut summary),
                Err(step) => {
                    warn!("{}: {}", doc, step);
                    let record = AnalysisRecord::failed(doc, step.to_string());
                    summary.record(&record);
                    self.save(store, record);
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        if prepared.is_empty() {
            info!("Nothing to submit");
            self.flush(store);
            summary.check();
            return Ok(summary);
        }

        let mut files: Vec<RemoteFile> = Vec::new();
        for item in &prepared {
            if !files.iter().any(|f| f.name == item.file.name) {
                files.push(item.file.clone());
            }
        }
        let requests = build_batch_requests(&files, &self.options.prompt, &self.options.mime_type);
        let display_name = format!(
            "{}-{}",
            self.options.batch_display_name,
            Utc::now().format("%Y%m%d-%H%M%S")
        );
        let submitted = submit_batch(
            self.service,
            &self.options.model,
            &requests,
            &self.options.batch_requests_path,
            &display_name,
        )
        .await?;
        let job_id = submitted.job_id.clone();

        let monitor = BatchJobMonitor::new(
            self.service,
            self.options.batch_poll_interval,
            self.options.batch_max_wait,
        );
        let job = monitor.wait(&job_id).await?;

        let pairs: Vec<(SourceDocument, RemoteFile)> = prepared
            .iter()
            .map(|p| (p.doc.clone(), p.file.clone()))
            .collect();
        let records = records_from_batch(&pairs, job.results);
        for (record, item) in records.into_iter().zip(&prepared) {
            if !record.is_ok() {
                warn!("{}: {}", item.doc, record.failure_reason().unwrap_or_default());
            }
            summary.record(&record);
            self.save(store, record.with_student(item.student.clone()));
        }
        self.flush(store);

        if self.options.delete_after_analysis {
            for file in &files {
                self.cleanup(&mut uploader, file).await;
            }
            if let Err(e) = self.service.delete_file(&submitted.requests_file.name).await {
                warn!("Could not delete {}: {}", submitted.requests_file.name, e);
            }
        }

        summary.check();
        info!(
            "Batch {} finished: {} ok, {} failed, {} skipped of {}",
            job_id, summary.ok, summary.failed, summary.skipped, summary.resolved
        );
        Ok(summary)
    }

    async fn uploader(&self) -> Uploader<'a> {
        let registry = if self.options.list_existing {
            match RemoteRegistry::load(self.service).await {
                Ok(registry) => registry,
                Err(e) => {
                    warn!("Could not list existing files, uploading everything: {}", e);
                    RemoteRegistry::empty()
                }
            }
        } else {
            RemoteRegistry::empty()
        };
        Uploader::new(self.service, registry, self.options.mime_type.clone())
            .with_dedup_key(self.options.dedup_key)
            .with_activation(self.options.activation_poll, self.options.activation_timeout)
    }

    fn progress(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        pb
    }

    fn student(&self, doc: &SourceDocument) -> Result<Option<StudentIdentity>, StepError> {
        if !self.options.extract_identity {
            return Ok(None);
        }
        extract_identity(&doc.display_name)
            .map(Some)
            .map_err(|e| StepError::new(Stage::Identity, e.kind(), e.to_string()))
    }

    /// Make sure the document is on the analysis service.
    async fn prepare(
        &self,
        doc: &SourceDocument,
        uploader: &mut Uploader<'a>,
        summary: &mut RunSummary,
    ) -> Result<RemoteFile, StepError> {
        if let Some(existing) = uploader.reuse_existing(doc).await {
            summary.reused += 1;
            return Ok(existing);
        }

        let bytes = ContentFetcher::new(self.storage)
            .with_chunk_size(self.options.chunk_size)
            .fetch(&doc.origin_id)
            .await
            .map_err(|e| StepError::new(Stage::Fetch, e.kind(), e.to_string()))?
            .into_inner();
        debug!("Fetched {} bytes for {}", bytes.len(), doc);

        let outcome = uploader
            .upload(doc, bytes)
            .await
            .map_err(|e| StepError::new(Stage::Upload, e.kind(), e.to_string()))?;
        summary.count_upload(&outcome);
        Ok(outcome.into_file())
    }

    fn skip(&self, doc: &SourceDocument, step: &StepError, summary: &mut RunSummary) {
        warn!("Skipping {}: {}", doc, step);
        summary.skipped += 1;
    }

    /// Append a record. A failed write is logged and retried by later appends.
    fn save(&self, store: &mut ResultStore, record: AnalysisRecord) {
        if let Err(e) = store.append(record) {
            warn!("Could not save results, continuing: {}", e);
        }
    }

    fn flush(&self, store: &mut ResultStore) {
        if let Err(e) = store.flush() {
            error!("{} results are only in memory: {}", store.len(), e);
        }
    }

    async fn cleanup(&self, uploader: &mut Uploader<'a>, file: &RemoteFile) {
        if let Err(e) = uploader.delete(file).await {
            warn!("Could not delete {}: {}", file.name, e);
        }
    }
}
