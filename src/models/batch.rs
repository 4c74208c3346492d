//! Asynchronous batch jobs on the analysis service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a batch job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
}

impl BatchState {
    /// Parse the service's state string.
    ///
    /// Accepts both `BATCH_STATE_*` and `JOB_STATE_*` spellings.
    pub fn from_api(s: &str) -> Option<Self> {
        let bare = s
            .trim_start_matches("BATCH_STATE_")
            .trim_start_matches("JOB_STATE_");
        match bare {
            "PENDING" | "QUEUED" | "UNSPECIFIED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Position in the lifecycle; terminal states share the highest rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One keyed result line from a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Remote file name the request was keyed by.
    pub key: String,
    pub outcome: Result<String, String>,
}

/// Snapshot of a batch job as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub job_id: String,
    pub state: BatchState,
    /// Name of the results artifact, set once the job succeeds.
    pub output_file: Option<String>,
    /// Error reported by the service for failed jobs.
    pub error: Option<String>,
    pub results: Vec<BatchEntry>,
}

impl BatchJob {
    pub fn new(job_id: impl Into<String>, state: BatchState) -> Self {
        Self {
            job_id: job_id.into(),
            state,
            output_file: None,
            error: None,
            results: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_api_prefixes() {
        assert_eq!(
            BatchState::from_api("BATCH_STATE_PENDING"),
            Some(BatchState::Queued)
        );
        assert_eq!(
            BatchState::from_api("JOB_STATE_SUCCEEDED"),
            Some(BatchState::Succeeded)
        );
        assert_eq!(
            BatchState::from_api("BATCH_STATE_RUNNING"),
            Some(BatchState::Running)
        );
        assert_eq!(BatchState::from_api("BATCH_STATE_PAUSED"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BatchState::Queued.is_terminal());
        assert!(!BatchState::Running.is_terminal());
        for state in [
            BatchState::Succeeded,
            BatchState::Failed,
            BatchState::Cancelled,
            BatchState::Expired,
        ] {
            assert!(state.is_terminal());
            assert!(state.rank() > BatchState::Running.rank());
        }
    }
}
