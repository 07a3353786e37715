//! Retry Policy for Stream Creation and Finalization
//!
//! Two separable strategies, composed by [`RetryingExecutor`]:
//!
//! ```text
//! failure ──► ResultClassifier ──► Transient? ──► ExponentialBackoff ──► sleep, retry
//!                     │                                  │
//!                     └─ Permanent / Unknown ──► fail    └─ budget spent ──► fail
//! ```
//!
//! Appends are never retried here: re-sending a batch on an exclusive
//! stream without an idempotency guarantee risks duplicate rows.

use crate::io::Rng;
use crate::write::client::{RpcStatus, StatusCode};
use crate::write::clock::WriteClock;
use crate::write::config::duration_millis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounds of the exponential backoff schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_retry_delay: Duration,
    /// Growth factor between consecutive delays (>= 1.0)
    pub retry_delay_multiplier: f64,
    /// Cap on any single delay
    #[serde(with = "duration_millis")]
    pub max_retry_delay: Duration,
    /// Total attempts including the first; 0 means unbounded by count
    pub max_attempts: u32,
    /// Wall-clock budget across all attempts; zero means unbounded by time
    #[serde(with = "duration_millis")]
    pub total_timeout: Duration,
    /// Draw each delay uniformly from [0, delay]
    pub jittered: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            initial_retry_delay: Duration::from_millis(1250),
            retry_delay_multiplier: 1.3,
            max_retry_delay: Duration::from_secs(60),
            max_attempts: 5,
            total_timeout: Duration::from_secs(600),
            jittered: true,
        }
    }
}

impl RetrySettings {
    /// Small, jitter-free schedule for tests
    pub fn test() -> Self {
        RetrySettings {
            initial_retry_delay: Duration::from_millis(10),
            retry_delay_multiplier: 2.0,
            max_retry_delay: Duration::from_millis(100),
            max_attempts: 5,
            total_timeout: Duration::from_secs(10),
            jittered: false,
        }
    }

    /// Fail on the first error
    pub fn no_retries() -> Self {
        RetrySettings {
            max_attempts: 1,
            ..Self::test()
        }
    }
}

/// How a failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Worth another attempt
    Transient,
    /// Will fail again; surface immediately
    Permanent,
    /// Not classifiable; treated as permanent
    Unknown,
}

/// Decides whether a failed attempt may be retried
pub trait ResultClassifier: Send + Sync {
    fn classify(&self, status: &RpcStatus) -> RetryDecision;
}

/// Classifies by status code against a set of retryable codes
#[derive(Debug, Clone)]
pub struct StatusCodeClassifier {
    retryable: HashSet<StatusCode>,
}

impl StatusCodeClassifier {
    pub const DEFAULT_RETRYABLE: [StatusCode; 3] = [
        StatusCode::Unavailable,
        StatusCode::DeadlineExceeded,
        StatusCode::ResourceExhausted,
    ];

    pub fn new(retryable: impl IntoIterator<Item = StatusCode>) -> Self {
        StatusCodeClassifier {
            retryable: retryable.into_iter().collect(),
        }
    }
}

impl Default for StatusCodeClassifier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRYABLE)
    }
}

impl ResultClassifier for StatusCodeClassifier {
    fn classify(&self, status: &RpcStatus) -> RetryDecision {
        if self.retryable.contains(&status.code) {
            RetryDecision::Transient
        } else if status.code == StatusCode::Unknown {
            RetryDecision::Unknown
        } else {
            RetryDecision::Permanent
        }
    }
}

/// Exponential delay schedule bounded by [`RetrySettings`]
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    settings: RetrySettings,
}

impl ExponentialBackoff {
    pub fn new(settings: RetrySettings) -> Self {
        ExponentialBackoff { settings }
    }

    /// Un-jittered delay after `attempts_made` failed attempts (>= 1)
    pub fn base_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial_ms = self.settings.initial_retry_delay.as_millis() as f64;
        let max_ms = self.settings.max_retry_delay.as_millis() as f64;
        let millis = initial_ms * self.settings.retry_delay_multiplier.powi(exponent);
        Duration::from_millis(millis.min(max_ms) as u64)
    }

    /// Delay to wait before the next attempt, jittered when configured
    pub fn next_delay(&self, attempts_made: u32, rng: &mut dyn Rng) -> Duration {
        let base = self.base_delay(attempts_made);
        if !self.settings.jittered {
            return base;
        }
        let base_ms = base.as_millis() as u64;
        Duration::from_millis(rng.gen_range(0, base_ms.saturating_add(1)))
    }

    /// Whether another attempt fits in the attempt and time budgets
    pub fn should_retry(&self, attempts_made: u32, elapsed: Duration, next_delay: Duration) -> bool {
        if self.settings.max_attempts > 0 && attempts_made >= self.settings.max_attempts {
            return false;
        }
        if !self.settings.total_timeout.is_zero()
            && elapsed.saturating_add(next_delay) > self.settings.total_timeout
        {
            return false;
        }
        true
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailureReason {
    /// The classifier refused to retry
    NonRetryable(RetryDecision),
    /// Attempt or time budget spent
    Exhausted,
    /// Cancelled while waiting between attempts
    Interrupted,
}

/// Terminal failure of a retried operation
#[derive(Debug, Clone)]
pub struct RetryError {
    pub operation: &'static str,
    pub attempts: u32,
    pub reason: RetryFailureReason,
    pub last_status: Option<RpcStatus>,
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match &self.reason {
            RetryFailureReason::NonRetryable(decision) => {
                format!("non-retryable failure ({:?})", decision)
            }
            RetryFailureReason::Exhausted => "retries exhausted".to_string(),
            RetryFailureReason::Interrupted => "interrupted".to_string(),
        };
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.operation, self.attempts, reason
        )?;
        if let Some(status) = &self.last_status {
            write!(f, ", last status {}", status)?;
        }
        Ok(())
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_status
            .as_ref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

/// Successful result plus the number of attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs an operation under classifier + backoff
pub struct RetryingExecutor<K: WriteClock> {
    classifier: Arc<dyn ResultClassifier>,
    backoff: ExponentialBackoff,
    clock: K,
    rng: Mutex<Box<dyn Rng>>,
    cancel: CancellationToken,
}

impl<K: WriteClock> RetryingExecutor<K> {
    pub fn new(
        classifier: Arc<dyn ResultClassifier>,
        backoff: ExponentialBackoff,
        clock: K,
        rng: Box<dyn Rng>,
        cancel: CancellationToken,
    ) -> Self {
        RetryingExecutor {
            classifier,
            backoff,
            clock,
            rng: Mutex::new(rng),
            cancel,
        }
    }

    /// Call `op` until it succeeds, fails permanently, or the budget runs out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<Retried<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcStatus>>,
    {
        let start = self.clock.now();
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError {
                    operation,
                    attempts,
                    reason: RetryFailureReason::Interrupted,
                    last_status: None,
                });
            }

            attempts = attempts.saturating_add(1);
            let status = match op().await {
                Ok(value) => return Ok(Retried { value, attempts }),
                Err(status) => status,
            };

            let decision = self.classifier.classify(&status);
            if decision != RetryDecision::Transient {
                debug!(operation, attempts, %status, ?decision, "not retrying");
                return Err(RetryError {
                    operation,
                    attempts,
                    reason: RetryFailureReason::NonRetryable(decision),
                    last_status: Some(status),
                });
            }

            let delay = {
                let mut rng = self.rng.lock();
                self.backoff.next_delay(attempts, &mut **rng)
            };
            if !self
                .backoff
                .should_retry(attempts, self.clock.elapsed(start), delay)
            {
                warn!(operation, attempts, %status, "retry budget exhausted");
                return Err(RetryError {
                    operation,
                    attempts,
                    reason: RetryFailureReason::Exhausted,
                    last_status: Some(status),
                });
            }

            warn!(
                operation,
                attempts,
                delay_ms = delay.as_millis() as u64,
                %status,
                "transient failure, retrying"
            );

            let interrupted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = self.clock.sleep(delay) => false,
            };
            if interrupted {
                return Err(RetryError {
                    operation,
                    attempts,
                    reason: RetryFailureReason::Interrupted,
                    last_status: Some(status),
                });
            }
        }
    }
}
