//! Data models for drivelens.

mod batch;
mod document;
mod record;

pub use batch::{BatchEntry, BatchJob, BatchState};
pub use document::{OutputArtifact, RemoteFile, SourceDocument, StudentIdentity};
pub use record::{AnalysisRecord, AnalysisStatus};
