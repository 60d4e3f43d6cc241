use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use stockflow_core::approvals::{plan_chain, role_for_stage, ResolvedApprovers};
use stockflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use stockflow_core::domain::actor::{Actor, UserId};
use stockflow_core::domain::approval::{ApprovalStage, Stage, StageId};
use stockflow_core::domain::request::{Request, RequestId, RequestStatus};
use stockflow_core::errors::{ApplicationError, DomainError};
use stockflow_db::repositories::{
    ApprovalStageRepository, ChainInsert, RequestRepository, UserDirectory,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainBuild {
    pub request_id: RequestId,
    pub stages: Vec<ApprovalStage>,
    /// False when the stages were already there and nothing was written.
    pub created: bool,
    pub missing_stages: Vec<Stage>,
}

impl ChainBuild {
    pub fn is_complete(&self) -> bool {
        self.missing_stages.is_empty()
    }
}

pub struct ApprovalChainBuilder {
    directory: Arc<dyn UserDirectory>,
    requests: Arc<dyn RequestRepository>,
    stages: Arc<dyn ApprovalStageRepository>,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalChainBuilder {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        requests: Arc<dyn RequestRepository>,
        stages: Arc<dyn ApprovalStageRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { directory, requests, stages, audit }
    }

    /// Materializes the stage records of an approved request. Calling it again,
    /// or concurrently, returns the chain that is already stored.
    pub async fn build(&self, request: &Request) -> Result<ChainBuild, ApplicationError> {
        if request.status != RequestStatus::Approved {
            return Err(DomainError::InvalidInput(format!(
                "request `{}` is {} and cannot start an approval chain",
                request.id,
                request.status.as_str()
            ))
            .into());
        }

        let existing = self.stages.list_for_request(&request.id).await?;
        if !existing.is_empty() {
            return Ok(existing_build(&request.id, existing));
        }

        let approvers = self.resolve_approvers(request).await?;
        let plan = plan_chain(request, &approvers, Utc::now(), || {
            StageId(Uuid::new_v4().to_string())
        })?;

        if !plan.missing_stages.is_empty() {
            let missing = stage_list(&plan.missing_stages);
            warn!(
                event_name = "workflow.chain.incomplete",
                correlation_id = %request.id,
                request_id = %request.id,
                missing_stages = %missing,
                "no approver found for some stages; building a degraded chain"
            );
            self.audit.emit(
                AuditEvent::new(
                    Some(request.id.clone()),
                    request.id.0.clone(),
                    "chain.incomplete",
                    AuditCategory::Chain,
                    "system",
                    AuditOutcome::Failed,
                )
                .with_metadata("missing_stages", missing),
            );
        }

        match self.stages.insert_chain(&request.id, plan.stages).await? {
            ChainInsert::Created(stages) => {
                info!(
                    event_name = "workflow.chain.built",
                    correlation_id = %request.id,
                    request_id = %request.id,
                    stage_count = stages.len(),
                    "approval chain created"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(request.id.clone()),
                        request.id.0.clone(),
                        "chain.built",
                        AuditCategory::Chain,
                        "system",
                        AuditOutcome::Success,
                    )
                    .with_metadata("stage_count", stages.len().to_string()),
                );
                Ok(ChainBuild {
                    request_id: request.id.clone(),
                    stages,
                    created: true,
                    missing_stages: plan.missing_stages,
                })
            }
            ChainInsert::Existing(stages) => Ok(existing_build(&request.id, stages)),
        }
    }

    /// Re-runs the build for an approved request whose chain went missing.
    pub async fn ensure_chain(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<ChainBuild, ApplicationError> {
        if !actor.is_admin() {
            return Err(DomainError::unauthorized(format!(
                "role `{}` cannot repair approval chains",
                actor.role
            ))
            .into());
        }

        let request = self
            .requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| DomainError::request_not_found(request_id.0.clone()))?;

        let build = self.build(&request).await?;
        info!(
            event_name = "workflow.chain.ensured",
            correlation_id = %request_id,
            request_id = %request_id,
            actor = %actor.id,
            created = build.created,
            "approval chain ensured"
        );
        Ok(build)
    }

    async fn resolve_approvers(&self, request: &Request) -> Result<ResolvedApprovers, ApplicationError> {
        let mut approvers = ResolvedApprovers::default();
        for stage in Stage::PIPELINE {
            let approver = match (stage, &request.stores_reviewer) {
                (Stage::Stores, Some(reviewer)) => Some(reviewer.clone()),
                _ => self.first_with_role_for(stage).await?,
            };
            approvers.set(stage, approver);
        }
        Ok(approvers)
    }

    async fn first_with_role_for(&self, stage: Stage) -> Result<Option<UserId>, ApplicationError> {
        let user = self.directory.first_user_with_role(role_for_stage(stage)).await?;
        Ok(user.map(|user| user.id))
    }
}

fn existing_build(request_id: &RequestId, stages: Vec<ApprovalStage>) -> ChainBuild {
    let missing_stages = Stage::PIPELINE
        .into_iter()
        .filter(|stage| !stages.iter().any(|existing| existing.stage == *stage))
        .collect();
    ChainBuild { request_id: request_id.clone(), stages, created: false, missing_stages }
}

fn stage_list(stages: &[Stage]) -> String {
    stages.iter().map(|stage| stage.as_str()).collect::<Vec<_>>().join(",")
}
