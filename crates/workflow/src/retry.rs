use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use stockflow_core::attestation::{AttestationClient, AttestationError, AttestationMode};
use stockflow_core::config::AttestationConfig;
use stockflow_core::domain::attestation::{AttestationEvent, TransactionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            max_retries: 2,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AttestationConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Worst-case wall time for one submission, used to size outer deadlines.
    pub fn budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let mut total = self.attempt_timeout.saturating_mul(attempts);
        for retry in 1..=self.max_retries {
            total = total.saturating_add(self.backoff(retry));
        }
        total
    }
}

/// Wraps a client with a per-attempt timeout and bounded exponential retries.
pub struct RetryingAttestationClient {
    inner: Arc<dyn AttestationClient>,
    policy: RetryPolicy,
}

impl RetryingAttestationClient {
    pub fn new(inner: Arc<dyn AttestationClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl AttestationClient for RetryingAttestationClient {
    fn mode(&self) -> AttestationMode {
        self.inner.mode()
    }

    async fn submit(&self, event: &AttestationEvent) -> Result<TransactionId, AttestationError> {
        let subject = event.subject_key();
        let mut retry = 0u32;

        loop {
            let attempt = tokio::time::timeout(self.policy.attempt_timeout, self.inner.submit(event));
            let error = match attempt.await {
                Ok(Ok(transaction_id)) => return Ok(transaction_id),
                Ok(Err(error)) => error,
                Err(_) => AttestationError::Timeout {
                    timeout_ms: u64::try_from(self.policy.attempt_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                },
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if retry >= self.policy.max_retries {
                return Err(AttestationError::Unavailable(format!(
                    "gave up after {} attempts: {error}",
                    retry + 1
                )));
            }

            retry += 1;
            let delay = self.policy.backoff(retry);
            warn!(
                event_name = "attestation.submit.retry",
                correlation_id = %subject,
                attempt = retry,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying attestation submission"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
