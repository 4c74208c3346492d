//! Backoff and pacing for calls to the analysis service.
//!
//! Two separate controls:
//! - [`Pacer`] keeps a minimum interval between consecutive calls, whatever
//!   their outcome.
//! - [`RetryPolicy`] decides whether and how long to wait before retrying a
//!   failed call, keyed by [`FailureKind`].

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::FailureKind;

/// What to do with a document whose analysis hit a quota error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaPolicy {
    /// Cool down, record the document as failed and move on. Re-run later to
    /// pick it up.
    #[default]
    SkipOnQuota,
    /// Cool down and retry the same document, up to `max_retries`.
    RetryOnQuota,
}

impl QuotaPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "skip" | "skip-on-quota" => Some(Self::SkipOnQuota),
            "retry" | "retry-on-quota" => Some(Self::RetryOnQuota),
            _ => None,
        }
    }
}

/// Decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then try the same call again.
    Retry(Duration),
    /// Sleep, then give up on this call.
    GiveUp(Duration),
    /// Give up immediately.
    Abandon,
}

/// Retry configuration, parameterized by failure kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff step for transient failures.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff step.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Add up to 50% random jitter to backoff steps.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Cooldown after a quota error.
    #[serde(default = "default_quota_cooldown_secs")]
    pub quota_cooldown_secs: u64,
    #[serde(default)]
    pub on_quota: QuotaPolicy,
    /// Minimum spacing between consecutive analysis calls.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_jitter() -> bool {
    true
}
fn default_quota_cooldown_secs() -> u64 {
    60
}
fn default_pacing_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            quota_cooldown_secs: default_quota_cooldown_secs(),
            on_quota: QuotaPolicy::default(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries or waits; used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
            quota_cooldown_secs: 0,
            on_quota: QuotaPolicy::SkipOnQuota,
            pacing_ms: 0,
        }
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.quota_cooldown_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Exponential backoff for the given 0-based attempt, capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms);
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }

    /// Decide what to do after attempt number `attempt` (0-based) failed.
    ///
    /// `retry_after` is the server's hint, if it sent one.
    pub fn decide(
        &self,
        kind: FailureKind,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let retries_left = attempt < self.max_retries;
        match kind {
            FailureKind::Quota => {
                let cooldown = retry_after
                    .map(|hint| hint.max(self.quota_cooldown()))
                    .unwrap_or_else(|| self.quota_cooldown());
                match self.on_quota {
                    QuotaPolicy::RetryOnQuota if retries_left => RetryDecision::Retry(cooldown),
                    _ => RetryDecision::GiveUp(cooldown),
                }
            }
            FailureKind::Transient if retries_left => {
                let wait = retry_after.unwrap_or_else(|| self.backoff(attempt));
                RetryDecision::Retry(wait)
            }
            _ => RetryDecision::Abandon,
        }
    }
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs.min(600)))
}

/// Enforces a minimum interval between consecutive calls.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_call: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: None,
        }
    }

    /// Wait until the interval since the previous call has passed, then mark
    /// a new call as started.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_call {
            let ready_at = last + self.interval;
            let now = Instant::now();
            if ready_at > now {
                let wait = ready_at - now;
                debug!("Pacing: waiting {:?} before next call", wait);
                tokio::time::sleep(wait).await;
            }
        }
        self.last_call = Some(Instant::now());
    }
}
