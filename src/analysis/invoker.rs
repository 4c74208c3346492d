//! Synchronous (one call per document) analysis with pacing and retries.

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::FailureKind;
use crate::gemini::{AnalysisService, GeminiError};
use crate::models::RemoteFile;
use crate::retry::{Pacer, RetryDecision, RetryPolicy};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{source} (after {attempts} attempts)")]
    Exhausted {
        #[source]
        source: GeminiError,
        attempts: u32,
    },
    #[error("quota exhausted: {0}")]
    QuotaSkipped(#[source] GeminiError),
    #[error(transparent)]
    Failed(GeminiError),
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::QuotaSkipped(_) => FailureKind::Quota,
            AnalysisError::Exhausted { source, .. } | AnalysisError::Failed(source) => {
                source.kind()
            }
        }
    }
}

/// Calls `generate_content` for one file at a time.
pub struct AnalysisInvoker<'a> {
    service: &'a dyn AnalysisService,
    model: String,
    policy: RetryPolicy,
    pacer: Pacer,
}

impl<'a> AnalysisInvoker<'a> {
    pub fn new(
        service: &'a dyn AnalysisService,
        model: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        let pacer = Pacer::new(policy.pacing());
        Self {
            service,
            model: model.into(),
            policy,
            pacer,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyze one uploaded file, retrying per the policy.
    pub async fn analyze(&mut self, file: &RemoteFile, prompt: &str) -> Result<String, AnalysisError> {
        let mime_type = file.mime_type.as_deref().unwrap_or("application/pdf");
        let mut attempt = 0u32;

        loop {
            self.pacer.acquire().await;
            let result = self
                .service
                .generate_content(&self.model, prompt, &file.uri, mime_type)
                .await;

            let err = match result {
                Ok(text) => {
                    debug!(
                        "Analysis of {} returned {} chars",
                        file.display_name,
                        text.len()
                    );
                    return Ok(text);
                }
                Err(err) => err,
            };

            let kind = err.kind();
            match self.policy.decide(kind, attempt, err.retry_after()) {
                RetryDecision::Retry(wait) => {
                    warn!(
                        "Analysis of {} failed ({}), retrying in {:?} (attempt {}/{}): {}",
                        file.display_name,
                        kind,
                        wait,
                        attempt + 1,
                        self.policy.max_retries,
                        err
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp(wait) => {
                    warn!(
                        "Quota exhausted analyzing {}, cooling down {:?} before moving on",
                        file.display_name, wait
                    );
                    tokio::time::sleep(wait).await;
                    return Err(if attempt == 0 {
                        AnalysisError::QuotaSkipped(err)
                    } else {
                        AnalysisError::Exhausted {
                            source: err,
                            attempts: attempt + 1,
                        }
                    });
                }
                RetryDecision::Abandon if attempt > 0 => {
                    return Err(AnalysisError::Exhausted {
                        source: err,
                        attempts: attempt + 1,
                    })
                }
                RetryDecision::Abandon => return Err(AnalysisError::Failed(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::RemoteFilePage;
    use crate::models::{BatchEntry, BatchJob};
    use crate::retry::QuotaPolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays a fixed sequence of generate_content results.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, GeminiError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, GeminiError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    fn unused() -> GeminiError {
        GeminiError::Parse("not scripted".to_string())
    }

    #[async_trait]
    impl AnalysisService for Scripted {
        async fn upload_file(&self, _: Vec<u8>, _: &str, _: &str) -> Result<RemoteFile, GeminiError> {
            Err(unused())
        }
        async fn list_files(&self, _: Option<&str>) -> Result<RemoteFilePage, GeminiError> {
            Err(unused())
        }
        async fn get_file(&self, _: &str) -> Result<RemoteFile, GeminiError> {
            Err(unused())
        }
        async fn delete_file(&self, _: &str) -> Result<(), GeminiError> {
            Err(unused())
        }
        async fn generate_content(
            &self,
            _model: &str,
            _prompt: &str,
            _file_uri: &str,
            _mime_type: &str,
        ) -> Result<String, GeminiError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(unused()))
        }
        async fn batch_create(&self, _: &str, _: &str, _: &str) -> Result<String, GeminiError> {
            Err(unused())
        }
        async fn batch_get(&self, _: &str) -> Result<BatchJob, GeminiError> {
            Err(unused())
        }
        async fn batch_results(&self, _: &BatchJob) -> Result<Vec<BatchEntry>, GeminiError> {
            Err(unused())
        }
    }

    fn http(status: u16) -> GeminiError {
        GeminiError::Api {
            status,
            message: format!("HTTP {}", status),
            api_status: None,
            retry_after: None,
        }
    }

    fn file() -> RemoteFile {
        RemoteFile {
            name: "files/1".to_string(),
            display_name: "essay.pdf".to_string(),
            uri: "https://files.example/1".to_string(),
            mime_type: Some("application/pdf".to_string()),
            state: Some("ACTIVE".to_string()),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: false,
            quota_cooldown_secs: 60,
            on_quota: QuotaPolicy::SkipOnQuota,
            pacing_ms: 2_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let service = Scripted::new(vec![Err(http(503)), Ok("fine".to_string())]);
        let mut invoker = AnalysisInvoker::new(&service, "gemini-test", policy());
        let text = invoker.analyze(&file(), "prompt").await.unwrap();
        assert_eq!(text, "fine");
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_retries() {
        let service = Scripted::new(vec![Err(http(500)), Err(http(502)), Err(http(503))]);
        let mut invoker = AnalysisInvoker::new(&service, "gemini-test", policy());
        let err = invoker.analyze(&file(), "prompt").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fails_immediately() {
        let service = Scripted::new(vec![Err(http(400)), Ok("never".to_string())]);
        let mut invoker = AnalysisInvoker::new(&service, "gemini-test", policy());
        let err = invoker.analyze(&file(), "prompt").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Failed(_)));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_skip_cools_down_once() {
        let service = Scripted::new(vec![Err(http(429)), Ok("never".to_string())]);
        let mut invoker = AnalysisInvoker::new(&service, "gemini-test", policy());
        let start = Instant::now();
        let err = invoker.analyze(&file(), "prompt").await.unwrap_err();
        assert!(matches!(err, AnalysisError::QuotaSkipped(_)));
        assert_eq!(err.kind(), FailureKind::Quota);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_retry_policy_retries() {
        let service = Scripted::new(vec![Err(http(429)), Ok("after cooldown".to_string())]);
        let policy = RetryPolicy {
            on_quota: QuotaPolicy::RetryOnQuota,
            ..policy()
        };
        let mut invoker = AnalysisInvoker::new(&service, "gemini-test", policy);
        let text = invoker.analyze(&file(), "prompt").await.unwrap();
        assert_eq!(text, "after cooldown");
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_documents() {
        let service = Scripted::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut invoker = AnalysisInvoker::new(&service, "gemini-test", policy());
        let start = Instant::now();
        invoker.analyze(&file(), "prompt").await.unwrap();
        invoker.analyze(&file(), "prompt").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
