//! Upload with deduplication against the analysis service's file store.

mod registry;

pub use registry::RemoteRegistry;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::FailureKind;
use crate::gemini::{AnalysisService, GeminiError};
use crate::models::{RemoteFile, SourceDocument};

/// Hex digits of the content hash appended to display names.
const HASH_PREFIX_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Service(#[from] GeminiError),
    #[error("service failed to process {0}")]
    ProcessingFailed(String),
    #[error("{name} still processing after {waited:?}")]
    NotReady { name: String, waited: Duration },
}

impl UploadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::Service(e) => e.kind(),
            UploadError::ProcessingFailed(_) => FailureKind::Rejected,
            UploadError::NotReady { .. } => FailureKind::Transient,
        }
    }
}

/// What identifies "the same document" across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupKey {
    /// The storage display name. Two different files with the same name collide.
    #[default]
    DisplayName,
    /// Display name plus a content hash prefix, so only identical bytes collide.
    ContentHash,
}

impl DedupKey {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "display-name" | "name" => Some(Self::DisplayName),
            "content-hash" | "hash" => Some(Self::ContentHash),
            _ => None,
        }
    }
}

/// Result of [`Uploader::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Already present remotely; nothing was sent.
    Reused(RemoteFile),
    Uploaded(RemoteFile),
}

impl UploadOutcome {
    pub fn file(&self) -> &RemoteFile {
        match self {
            UploadOutcome::Reused(file) | UploadOutcome::Uploaded(file) => file,
        }
    }

    pub fn into_file(self) -> RemoteFile {
        match self {
            UploadOutcome::Reused(file) | UploadOutcome::Uploaded(file) => file,
        }
    }

    pub fn was_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded(_))
    }
}

/// Uploads documents, consulting and updating a [`RemoteRegistry`].
pub struct Uploader<'a> {
    service: &'a dyn AnalysisService,
    registry: RemoteRegistry,
    mime_type: String,
    dedup_key: DedupKey,
    activation_poll: Duration,
    activation_timeout: Duration,
    /// Keys claimed by documents earlier in this run.
    claimed: HashSet<String>,
}

impl<'a> Uploader<'a> {
    pub fn new(
        service: &'a dyn AnalysisService,
        registry: RemoteRegistry,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            service,
            registry,
            mime_type: mime_type.into(),
            dedup_key: DedupKey::default(),
            activation_poll: Duration::from_secs(2),
            activation_timeout: Duration::from_secs(120),
            claimed: HashSet::new(),
        }
    }

    pub fn with_dedup_key(mut self, dedup_key: DedupKey) -> Self {
        self.dedup_key = dedup_key;
        self
    }

    /// How often and how long to wait for an uploaded file to become usable.
    pub fn with_activation(mut self, poll: Duration, timeout: Duration) -> Self {
        self.activation_poll = poll;
        self.activation_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &RemoteRegistry {
        &self.registry
    }

    pub fn dedup_key(&self) -> DedupKey {
        self.dedup_key
    }

    /// Reuse the registry entry for `doc` if it can be found without the
    /// document's content.
    ///
    /// Only display-name keys can be checked before fetching; content-hash
    /// keys need the bytes.
    pub async fn reuse_existing(&mut self, doc: &SourceDocument) -> Option<RemoteFile> {
        match self.dedup_key {
            DedupKey::DisplayName => self.claim(doc, doc.display_name.clone()).await,
            DedupKey::ContentHash => None,
        }
    }

    /// Look up `key` in the registry and mark it as used by `doc`.
    ///
    /// Entries still `PROCESSING` are waited on. Entries that failed or never
    /// become active are dropped, so the document gets uploaded again.
    async fn claim(&mut self, doc: &SourceDocument, key: String) -> Option<RemoteFile> {
        let entry = self.registry.get(&key)?.clone();
        let existing = match self.await_active(entry).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Not reusing remote file for {}: {}", doc, e);
                self.registry.remove(&key);
                return None;
            }
        };
        if self.claimed.contains(&key) {
            warn!(
                "{} collides with another document in this run; reusing {}",
                doc, existing.name
            );
        } else {
            info!("Reusing {} for {}", existing.name, doc);
        }
        self.claimed.insert(key);
        self.registry.insert(existing.clone());
        Some(existing)
    }

    /// Ensure the document is present remotely, uploading it if needed.
    pub async fn upload(
        &mut self,
        doc: &SourceDocument,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, UploadError> {
        let key = upload_name(doc, &bytes, self.dedup_key);

        if let Some(existing) = self.claim(doc, key.clone()).await {
            return Ok(UploadOutcome::Reused(existing));
        }

        self.check_content_type(doc, &bytes);

        let file = self
            .service
            .upload_file(bytes, &key, &self.mime_type)
            .await?;
        let file = self.await_active(file).await?;
        info!("Uploaded {} as {}", doc, file.name);

        self.claimed.insert(key);
        self.registry.insert(file.clone());
        Ok(UploadOutcome::Uploaded(file))
    }

    /// Remove a file from the service and from the registry.
    pub async fn delete(&mut self, file: &RemoteFile) -> Result<(), UploadError> {
        self.service.delete_file(&file.name).await?;
        self.registry.remove(&file.display_name);
        debug!("Deleted remote file {}", file.name);
        Ok(())
    }

    fn check_content_type(&self, doc: &SourceDocument, bytes: &[u8]) {
        match infer::get(bytes) {
            Some(detected) if detected.mime_type() != self.mime_type => warn!(
                "{} looks like {} rather than {}; uploading anyway",
                doc,
                detected.mime_type(),
                self.mime_type
            ),
            Some(_) => {}
            None => debug!("Could not sniff content type of {}", doc),
        }
    }

    /// Wait while the service reports the file as `PROCESSING`.
    async fn await_active(&self, mut file: RemoteFile) -> Result<RemoteFile, UploadError> {
        let started = Instant::now();
        loop {
            match file.state.as_deref() {
                Some("PROCESSING") => {}
                Some("FAILED") => return Err(UploadError::ProcessingFailed(file.name)),
                _ => return Ok(file),
            }
            let waited = started.elapsed();
            if waited >= self.activation_timeout {
                return Err(UploadError::NotReady {
                    name: file.name,
                    waited,
                });
            }
            debug!("{} still processing, checking again in {:?}", file.name, self.activation_poll);
            tokio::time::sleep(self.activation_poll).await;
            file = self.service.get_file(&file.name).await?;
        }
    }
}

/// Display name a document is uploaded (and looked up) under.
pub fn upload_name(doc: &SourceDocument, bytes: &[u8], dedup_key: DedupKey) -> String {
    match dedup_key {
        DedupKey::DisplayName => doc.display_name.clone(),
        DedupKey::ContentHash => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hex::encode(hasher.finalize());
            format!("{}#{}", doc.display_name, &digest[..HASH_PREFIX_LEN])
        }
    }
}
