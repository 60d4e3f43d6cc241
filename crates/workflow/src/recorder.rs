use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use stockflow_core::attestation::{AttestationClient, AttestationError, AttestationMode};
use stockflow_core::domain::actor::UserId;
use stockflow_core::domain::approval::{Stage, StageStatus};
use stockflow_core::domain::attestation::{AttestationEvent, AttestationRecord, TransactionId};
use stockflow_core::domain::request::RequestId;
use stockflow_core::errors::ApplicationError;
use stockflow_db::repositories::AttestationLogRepository;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// What happened to the attestation attached to a decision. Never an error:
/// the decision itself is already committed when this is produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttestationOutcome {
    Recorded { transaction_id: TransactionId, simulated: bool },
    Unavailable { reason: String },
    /// The action did not decide anything, so nothing was attested.
    Skipped,
}

impl AttestationOutcome {
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            Self::Recorded { transaction_id, .. } => Some(transaction_id),
            Self::Unavailable { .. } | Self::Skipped => None,
        }
    }
}

/// Submits events to the attestation sink and keeps a local record of every
/// acknowledged submission. Both steps are best effort.
#[derive(Clone)]
pub struct AttestationRecorder {
    client: Arc<dyn AttestationClient>,
    log: Arc<dyn AttestationLogRepository>,
    deadline: Duration,
}

impl AttestationRecorder {
    pub fn new(client: Arc<dyn AttestationClient>, log: Arc<dyn AttestationLogRepository>) -> Self {
        Self { client, log, deadline: DEFAULT_DEADLINE }
    }

    /// Upper bound on a whole submission, retries included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn mode(&self) -> AttestationMode {
        self.client.mode()
    }

    pub async fn record_approval(
        &self,
        initiated_by: &UserId,
        request_id: &RequestId,
        stage: Stage,
        decision: StageStatus,
        comment: &str,
    ) -> AttestationOutcome {
        let event = AttestationEvent::Approval {
            request_id: request_id.clone(),
            stage,
            decision,
            comment: comment.to_string(),
        };
        let submission = self.client.log_approval(request_id, stage, decision, comment);
        self.finish(initiated_by, event, submission).await
    }

    pub async fn record(&self, initiated_by: &UserId, event: AttestationEvent) -> AttestationOutcome {
        let client = Arc::clone(&self.client);
        let submitted = event.clone();
        let submission = async move { client.submit(&submitted).await };
        self.finish(initiated_by, event, submission).await
    }

    pub async fn records_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AttestationRecord>, ApplicationError> {
        Ok(self.log.list_for_request(request_id).await?)
    }

    async fn finish<F>(
        &self,
        initiated_by: &UserId,
        event: AttestationEvent,
        submission: F,
    ) -> AttestationOutcome
    where
        F: std::future::Future<Output = Result<TransactionId, AttestationError>>,
    {
        let subject = event.subject_key();
        let result = match tokio::time::timeout(self.deadline, submission).await {
            Ok(result) => result,
            Err(_) => Err(AttestationError::Timeout {
                timeout_ms: u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let transaction_id = match result {
            Ok(transaction_id) => transaction_id,
            Err(error) => {
                warn!(
                    event_name = "attestation.submit.failed",
                    correlation_id = %subject,
                    event_type = event.event_type().as_str(),
                    error = %error,
                    "attestation unavailable; decision stands without it"
                );
                return AttestationOutcome::Unavailable { reason: error.to_string() };
            }
        };

        let simulated = self.client.mode() == AttestationMode::Simulation;
        let record = AttestationRecord {
            id: Uuid::new_v4().to_string(),
            event_type: event.event_type(),
            transaction_id: transaction_id.clone(),
            request_id: event.request_id().cloned(),
            item_id: event.item_id().cloned(),
            initiated_by: initiated_by.clone(),
            payload: serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
            simulated,
            logged_at: Utc::now(),
        };

        match self.log.append(record).await {
            Ok(()) => info!(
                event_name = "attestation.submit.recorded",
                correlation_id = %subject,
                transaction_id = %transaction_id,
                simulated,
                "attestation recorded"
            ),
            Err(error) => warn!(
                event_name = "attestation.persist.failed",
                correlation_id = %subject,
                transaction_id = %transaction_id,
                error = %error,
                "attestation accepted by sink but local record failed"
            ),
        }

        AttestationOutcome::Recorded { transaction_id, simulated }
    }
}
