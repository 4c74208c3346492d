//! Documents as seen by the storage backend and by the analysis service.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A document at the storage backend, resolved by a `SourceResolver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Storage backend file ID.
    pub origin_id: String,
    /// Human-readable file name, also the default dedup key.
    pub display_name: String,
    /// Where the document came from: a folder ID, an external link or a sheet cell.
    pub origin_ref: String,
}

impl SourceDocument {
    pub fn new(
        origin_id: impl Into<String>,
        display_name: impl Into<String>,
        origin_ref: impl Into<String>,
    ) -> Self {
        Self {
            origin_id: origin_id.into(),
            display_name: display_name.into(),
            origin_ref: origin_ref.into(),
        }
    }
}

impl fmt::Display for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.origin_id)
    }
}

/// A file registered with the analysis service.
///
/// The service owns it; the pipeline only holds a reference by `name`/`uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Service-internal handle, e.g. `files/abc123`.
    pub name: String,
    pub display_name: String,
    /// Dereferenceable URI used in generation requests.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Processing state reported by the service (`ACTIVE`, `PROCESSING`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A student's name derived from a submission filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub first_name: String,
    pub last_name: String,
}

impl fmt::Display for StudentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.last_name.is_empty() {
            write!(f, "{}", self.first_name)
        } else {
            write!(f, "{} {}", self.first_name, self.last_name)
        }
    }
}

/// A rendered output file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub source_name: String,
    pub path: PathBuf,
}
