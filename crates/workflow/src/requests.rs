use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use stockflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use stockflow_core::domain::actor::{Actor, Role};
use stockflow_core::domain::request::{
    NewRequest, Request, RequestAmendment, RequestId, RequestStatus, StoresDecision,
};
use stockflow_core::errors::{ApplicationError, DomainError};
use stockflow_db::repositories::{GuardedWrite, RequestFilter, RequestRepository};

use crate::chain::{ApprovalChainBuilder, ChainBuild};

/// Result of a stores decision. `chain` is `None` for rejections and when the
/// chain build failed after the decision was committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoresOutcome {
    pub request: Request,
    pub chain: Option<ChainBuild>,
}

pub struct RequestStore {
    requests: Arc<dyn RequestRepository>,
    chains: Arc<ApprovalChainBuilder>,
    audit: Arc<dyn AuditSink>,
}

impl RequestStore {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        chains: Arc<ApprovalChainBuilder>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { requests, chains, audit }
    }

    pub async fn create(&self, actor: &Actor, input: NewRequest) -> Result<Request, ApplicationError> {
        let request =
            Request::open(RequestId(Uuid::new_v4().to_string()), actor, input, Utc::now())?;
        self.requests.insert(request.clone()).await?;

        info!(
            event_name = "workflow.request.created",
            correlation_id = %request.id,
            request_id = %request.id,
            actor = %actor.id,
            quantity = request.quantity,
            priority = request.priority.as_str(),
            "stock request submitted"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                request.id.0.clone(),
                "request.created",
                AuditCategory::Request,
                actor.id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("item_id", request.item_id.0.clone()),
        );
        Ok(request)
    }

    /// Requests the actor may not see are reported as missing.
    pub async fn get(&self, actor: &Actor, id: &RequestId) -> Result<Request, ApplicationError> {
        match self.requests.find_by_id(id).await? {
            Some(request) if request.is_visible_to(actor) => Ok(request),
            _ => Err(DomainError::request_not_found(id.0.clone()).into()),
        }
    }

    pub async fn list_visible(&self, actor: &Actor) -> Result<Vec<Request>, ApplicationError> {
        let filter = if actor.role.sees_all_requests() {
            RequestFilter::default()
        } else if actor.role == Role::Requester {
            RequestFilter { requested_by: Some(actor.id.clone()), ..RequestFilter::default() }
        } else {
            return Ok(Vec::new());
        };
        Ok(self.requests.list(filter).await?)
    }

    pub async fn list_pending(&self, actor: &Actor) -> Result<Vec<Request>, ApplicationError> {
        let pending = Some(RequestStatus::Pending);
        let filter = match actor.role {
            Role::StoresReviewer | Role::Admin => {
                RequestFilter { status: pending, ..RequestFilter::default() }
            }
            Role::Requester => RequestFilter { requested_by: Some(actor.id.clone()), status: pending },
            Role::ProcurementReviewer | Role::CfoReviewer => return Ok(Vec::new()),
        };
        Ok(self.requests.list(filter).await?)
    }

    pub async fn amend(
        &self,
        actor: &Actor,
        id: &RequestId,
        amendment: RequestAmendment,
    ) -> Result<Request, ApplicationError> {
        let mut request = self
            .requests
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::request_not_found(id.0.clone()))?;
        request.apply_amendment(actor, amendment, Utc::now())?;

        match self.requests.update_pending_details(&request).await? {
            GuardedWrite::Applied(updated) => {
                info!(
                    event_name = "workflow.request.amended",
                    correlation_id = %id,
                    request_id = %id,
                    actor = %actor.id,
                    "pending request amended"
                );
                Ok(updated)
            }
            GuardedWrite::AlreadyDecided(current) => {
                Err(DomainError::request_already_decided(id.0.clone(), current.status).into())
            }
            GuardedWrite::Missing => Err(DomainError::request_not_found(id.0.clone()).into()),
        }
    }

    /// Records the stores-level decision and, on approval, builds the chain in
    /// the same call. A failed build leaves the decision committed.
    pub async fn decide_stores_stage(
        &self,
        actor: &Actor,
        id: &RequestId,
        decision: StoresDecision,
        comment: &str,
    ) -> Result<StoresOutcome, ApplicationError> {
        if !actor.role.can_decide_requests() {
            self.reject_decision(actor, id, "role_cannot_decide");
            return Err(DomainError::unauthorized(format!(
                "role `{}` cannot decide stock requests",
                actor.role
            ))
            .into());
        }

        let request = self
            .requests
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::request_not_found(id.0.clone()))?;
        if let Err(error) = request.check_stores_decision(actor) {
            self.reject_decision(actor, id, error.kind());
            return Err(error.into());
        }

        let status = decision.resulting_status();
        let request = match self
            .requests
            .record_stores_decision(id, status, &actor.id, comment, Utc::now())
            .await?
        {
            GuardedWrite::Applied(request) => request,
            GuardedWrite::AlreadyDecided(current) => {
                self.reject_decision(actor, id, "already_decided");
                return Err(DomainError::request_already_decided(id.0.clone(), current.status).into());
            }
            GuardedWrite::Missing => return Err(DomainError::request_not_found(id.0.clone()).into()),
        };

        info!(
            event_name = "workflow.request.decided",
            correlation_id = %id,
            request_id = %id,
            actor = %actor.id,
            status = status.as_str(),
            "stores decision recorded"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(id.clone()),
                id.0.clone(),
                "request.decided",
                AuditCategory::Request,
                actor.id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("status", status.as_str()),
        );

        let chain = match status {
            RequestStatus::Approved => match self.chains.build(&request).await {
                Ok(chain) => Some(chain),
                Err(build_error) => {
                    error!(
                        event_name = "workflow.chain.build_failed",
                        correlation_id = %id,
                        request_id = %id,
                        error = %build_error,
                        "approval chain build failed; request stays approved"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            Some(id.clone()),
                            id.0.clone(),
                            "chain.build_failed",
                            AuditCategory::Chain,
                            "system",
                            AuditOutcome::Failed,
                        )
                        .with_metadata("error", build_error.to_string()),
                    );
                    None
                }
            },
            RequestStatus::Pending | RequestStatus::Rejected => None,
        };

        Ok(StoresOutcome { request, chain })
    }

    fn reject_decision(&self, actor: &Actor, id: &RequestId, reason: &str) {
        warn!(
            event_name = "workflow.request.decision_rejected",
            correlation_id = %id,
            request_id = %id,
            actor = %actor.id,
            reason,
            "stores decision refused"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(id.clone()),
                id.0.clone(),
                "request.decision_rejected",
                AuditCategory::Request,
                actor.id.0.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", reason),
        );
    }
}
