//! Contract for the external append-only attestation log.
//!
//! Attestation is advisory: callers record the authoritative state first and
//! treat every error returned here as recoverable.

mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{Stage, StageStatus};
use crate::domain::attestation::{AttestationEvent, TransactionId};
use crate::domain::request::RequestId;

pub use simulated::{ChainVerification, SimulatedAttestationClient, SimulatedEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationMode {
    /// Transaction ids are synthesized locally; nothing leaves the process.
    Simulation,
    /// Events are relayed to an external gateway.
    Gateway,
}

impl AttestationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::Gateway => "gateway",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("attestation sink unavailable: {0}")]
    Unavailable(String),
    #[error("attestation call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("attestation rejected by sink: {0}")]
    Rejected(String),
}

impl AttestationError {
    /// Rejections are final; transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

#[async_trait]
pub trait AttestationClient: Send + Sync {
    fn mode(&self) -> AttestationMode;

    async fn submit(&self, event: &AttestationEvent) -> Result<TransactionId, AttestationError>;

    async fn log_approval(
        &self,
        request_id: &RequestId,
        stage: Stage,
        decision: StageStatus,
        comment: &str,
    ) -> Result<TransactionId, AttestationError> {
        self.submit(&AttestationEvent::Approval {
            request_id: request_id.clone(),
            stage,
            decision,
            comment: comment.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::AttestationError;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(AttestationError::Unavailable("connection refused".into()).is_retryable());
        assert!(AttestationError::Timeout { timeout_ms: 500 }.is_retryable());
        assert!(!AttestationError::Rejected("bad payload".into()).is_retryable());
    }
}
