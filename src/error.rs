//! Failure classification shared by every pipeline stage.

use std::fmt;

use thiserror::Error;

/// How a per-document failure should be treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network hiccup or 5xx; worth retrying.
    Transient,
    /// Quota or rate limit exhausted.
    Quota,
    /// Input that cannot be interpreted (bad link, bad filename, bad response).
    Malformed,
    /// Local filesystem problem.
    LocalIo,
    /// The remote side refused the request and will refuse it again.
    Rejected,
    Unexpected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Quota => "quota",
            Self::Malformed => "malformed",
            Self::LocalIo => "local-io",
            Self::Rejected => "rejected",
            Self::Unexpected => "unexpected",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Quota)
    }

    /// Classify an HTTP status code returned by a Google API.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::Quota,
            408 | 500..=599 => Self::Transient,
            400..=499 => Self::Rejected,
            _ => Self::Unexpected,
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient
        } else if err.is_decode() {
            Self::Malformed
        } else {
            Self::Unexpected
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a document failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Identity,
    Fetch,
    Upload,
    Analyze,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Fetch => "fetch",
            Self::Upload => "upload",
            Self::Analyze => "analyze",
        }
    }

    /// Whether a failure at this stage happens before anything is sent to the
    /// analysis service; such documents are skipped rather than recorded.
    pub fn is_before_upload(&self) -> bool {
        matches!(self, Self::Identity | Self::Fetch)
    }
}

/// A per-document failure with its stage and classification.
#[derive(Debug, Error)]
#[error("{stage} failed ({kind}): {detail}", stage = .stage.as_str())]
pub struct StepError {
    pub stage: Stage,
    pub kind: FailureKind,
    pub detail: String,
}

impl StepError {
    pub fn new(stage: Stage, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(FailureKind::from_status(429), FailureKind::Quota);
        assert_eq!(FailureKind::from_status(503), FailureKind::Transient);
        assert_eq!(FailureKind::from_status(408), FailureKind::Transient);
        assert_eq!(FailureKind::from_status(400), FailureKind::Rejected);
        assert_eq!(FailureKind::from_status(404), FailureKind::Rejected);
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::new(Stage::Analyze, FailureKind::Quota, "429 from service");
        assert_eq!(err.to_string(), "analyze failed (quota): 429 from service");
    }

    #[test]
    fn test_stage_before_upload() {
        assert!(Stage::Fetch.is_before_upload());
        assert!(Stage::Identity.is_before_upload());
        assert!(!Stage::Upload.is_before_upload());
        assert!(!Stage::Analyze.is_before_upload());
    }
}
