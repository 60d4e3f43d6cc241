use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use stockflow_core::approvals::{authorize_stage_decision, stage_for_role};
use stockflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use stockflow_core::domain::actor::Actor;
use stockflow_core::domain::approval::{
    AggregateStatus, ApprovalStage, Stage, StageAction, StageId, StageStatus,
};
use stockflow_core::domain::request::RequestId;
use stockflow_core::errors::{ApplicationError, DomainError};
use stockflow_db::repositories::{
    ApprovalStageRepository, GuardedWrite, RequestRepository, StageFilter,
};

use crate::recorder::{AttestationOutcome, AttestationRecorder};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageDecision {
    pub stage: ApprovalStage,
    pub action: StageAction,
    pub attestation: AttestationOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub request_id: RequestId,
    pub stages: Vec<ApprovalStage>,
    pub aggregate: AggregateStatus,
    /// Every pipeline stage has a record.
    pub is_complete: bool,
}

/// Per-stage decisions. Each stage moves out of pending exactly once.
pub struct ApprovalStateMachine {
    stages: Arc<dyn ApprovalStageRepository>,
    requests: Arc<dyn RequestRepository>,
    recorder: AttestationRecorder,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalStateMachine {
    pub fn new(
        stages: Arc<dyn ApprovalStageRepository>,
        requests: Arc<dyn RequestRepository>,
        recorder: AttestationRecorder,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { stages, requests, recorder, audit }
    }

    pub async fn list_visible(&self, actor: &Actor) -> Result<Vec<ApprovalStage>, ApplicationError> {
        self.list_for(actor, None).await
    }

    pub async fn list_pending(&self, actor: &Actor) -> Result<Vec<ApprovalStage>, ApplicationError> {
        self.list_for(actor, Some(StageStatus::Pending)).await
    }

    async fn list_for(
        &self,
        actor: &Actor,
        status: Option<StageStatus>,
    ) -> Result<Vec<ApprovalStage>, ApplicationError> {
        let filter = if actor.is_admin() {
            StageFilter { status, ..StageFilter::default() }
        } else if let Some(stage) = stage_for_role(actor.role) {
            StageFilter { approver: Some(actor.id.clone()), stage: Some(stage), status }
        } else {
            return Ok(Vec::new());
        };
        Ok(self.stages.list(filter).await?)
    }

    pub async fn decide(
        &self,
        actor: &Actor,
        stage_id: &StageId,
        action: StageAction,
        comment: &str,
    ) -> Result<StageDecision, ApplicationError> {
        let stage = self
            .stages
            .find_by_id(stage_id)
            .await?
            .ok_or_else(|| DomainError::stage_not_found(stage_id.0.clone()))?;

        if let Err(failure) = authorize_stage_decision(actor, &stage) {
            self.reject_decision(actor, &stage, "unauthorized");
            return Err(DomainError::from(failure).into());
        }
        if stage.status.is_terminal() {
            self.reject_decision(actor, &stage, "already_decided");
            return Err(DomainError::stage_already_decided(stage_id.0.clone(), stage.status).into());
        }

        // Resubmission keeps the stage pending; the guarded write still refuses
        // it if another approver decided in the meantime.
        let target = action.terminal_status().unwrap_or(StageStatus::Pending);
        let stage = match self.stages.record_decision(stage_id, target, comment, Utc::now()).await? {
            GuardedWrite::Applied(stage) => stage,
            GuardedWrite::AlreadyDecided(current) => {
                self.reject_decision(actor, &current, "already_decided");
                return Err(
                    DomainError::stage_already_decided(stage_id.0.clone(), current.status).into()
                );
            }
            GuardedWrite::Missing => {
                return Err(DomainError::stage_not_found(stage_id.0.clone()).into())
            }
        };

        let decided = action.terminal_status().is_some();
        let (event_name, audit_type, message) = if decided {
            ("workflow.stage.decided", "stage.decided", "approval stage decided")
        } else {
            ("workflow.stage.annotated", "stage.annotated", "resubmission requested")
        };
        info!(
            event_name = event_name,
            correlation_id = %stage.request_id,
            request_id = %stage.request_id,
            stage_id = %stage.id,
            stage = stage.stage.as_str(),
            action = action.as_str(),
            actor = %actor.id,
            "{message}"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(stage.request_id.clone()),
                stage.request_id.0.clone(),
                audit_type,
                AuditCategory::Stage,
                actor.id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("stage", stage.stage.as_str())
            .with_metadata("action", action.as_str()),
        );

        let attestation = match action.terminal_status() {
            Some(decision) => {
                self.recorder
                    .record_approval(&actor.id, &stage.request_id, stage.stage, decision, comment)
                    .await
            }
            None => AttestationOutcome::Skipped,
        };

        Ok(StageDecision { stage, action, attestation })
    }

    /// Stages of a request the actor can see, with the derived chain status.
    pub async fn chain_summary(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<ChainSummary, ApplicationError> {
        match self.requests.find_by_id(request_id).await? {
            Some(request) if request.is_visible_to(actor) => {}
            _ => return Err(DomainError::request_not_found(request_id.0.clone()).into()),
        }

        let stages = self.stages.list_for_request(request_id).await?;
        Ok(ChainSummary {
            request_id: request_id.clone(),
            aggregate: stockflow_core::approvals::aggregate_status(&stages),
            is_complete: Stage::PIPELINE
                .iter()
                .all(|expected| stages.iter().any(|stage| stage.stage == *expected)),
            stages,
        })
    }

    pub async fn aggregate_status(
        &self,
        request_id: &RequestId,
    ) -> Result<AggregateStatus, ApplicationError> {
        let stages = self.stages.list_for_request(request_id).await?;
        Ok(stockflow_core::approvals::aggregate_status(&stages))
    }

    pub fn recorder(&self) -> &AttestationRecorder {
        &self.recorder
    }

    fn reject_decision(&self, actor: &Actor, stage: &ApprovalStage, reason: &str) {
        warn!(
            event_name = "workflow.stage.decision_rejected",
            correlation_id = %stage.request_id,
            request_id = %stage.request_id,
            stage_id = %stage.id,
            actor = %actor.id,
            reason,
            "stage decision refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(stage.request_id.clone()),
                stage.request_id.0.clone(),
                "stage.decision_rejected",
                AuditCategory::Stage,
                actor.id.0.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("stage", stage.stage.as_str())
            .with_metadata("reason", reason),
        );
    }
}
