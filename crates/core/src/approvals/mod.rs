//! Approval-chain rules shared by every authorization site.
//!
//! Everything here is pure: storage, approver lookup and attestation live in the
//! workflow crate and feed their results in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::approval::{AggregateStatus, ApprovalStage, Stage, StageId, StageStatus};
use crate::domain::request::{Request, RequestStatus};
use crate::errors::DomainError;

pub const STORES_AUTO_APPROVAL_COMMENT: &str =
    "Automatically approved as part of the stores request decision.";

/// Role-to-stage table. ADMIN and REQUESTER own no stage.
pub fn stage_for_role(role: Role) -> Option<Stage> {
    match role {
        Role::StoresReviewer => Some(Stage::Stores),
        Role::ProcurementReviewer => Some(Stage::Procurement),
        Role::CfoReviewer => Some(Stage::Cfo),
        Role::Requester | Role::Admin => None,
    }
}

/// Inverse of [`stage_for_role`], used to resolve approvers.
pub fn role_for_stage(stage: Stage) -> Role {
    match stage {
        Stage::Stores => Role::StoresReviewer,
        Stage::Procurement => Role::ProcurementReviewer,
        Stage::Cfo => Role::CfoReviewer,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageAuthorizationFailure {
    #[error("role `{role}` is not mapped to any approval stage")]
    NoStageForRole { role: Role },
    #[error("role `{role}` cannot act on the {stage} stage")]
    StageMismatch { role: Role, stage: Stage },
    #[error("actor `{actor}` is not the assigned approver `{approver}`")]
    NotAssignedApprover { actor: UserId, approver: UserId },
}

impl From<StageAuthorizationFailure> for DomainError {
    fn from(failure: StageAuthorizationFailure) -> Self {
        DomainError::unauthorized(failure.to_string())
    }
}

/// Checks that `actor` may decide `stage`: object ownership and role mapping
/// must both hold.
pub fn authorize_stage_decision(
    actor: &Actor,
    stage: &ApprovalStage,
) -> Result<(), StageAuthorizationFailure> {
    let Some(actor_stage) = stage_for_role(actor.role) else {
        return Err(StageAuthorizationFailure::NoStageForRole { role: actor.role });
    };

    if stage.approver != actor.id {
        return Err(StageAuthorizationFailure::NotAssignedApprover {
            actor: actor.id.clone(),
            approver: stage.approver.clone(),
        });
    }

    if actor_stage != stage.stage {
        return Err(StageAuthorizationFailure::StageMismatch {
            role: actor.role,
            stage: stage.stage,
        });
    }

    Ok(())
}

/// Visibility used by stage listings: admins see everything, approvers see
/// their own assignments at their stage.
pub fn is_stage_visible(actor: &Actor, stage: &ApprovalStage) -> bool {
    if actor.is_admin() {
        return true;
    }
    match stage_for_role(actor.role) {
        Some(actor_stage) => actor_stage == stage.stage && stage.approver == actor.id,
        None => false,
    }
}

/// A chain missing any pipeline stage never reaches `FullyApproved`.
pub fn aggregate_status(stages: &[ApprovalStage]) -> AggregateStatus {
    if stages.iter().any(|stage| stage.status == StageStatus::Rejected) {
        return AggregateStatus::Blocked;
    }
    let complete =
        Stage::PIPELINE.iter().all(|wanted| stages.iter().any(|stage| stage.stage == *wanted));
    if complete && stages.iter().all(|stage| stage.status == StageStatus::Approved) {
        return AggregateStatus::FullyApproved;
    }
    AggregateStatus::InProgress
}

/// Approvers found for each stage before a chain is materialized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedApprovers {
    approvers: HashMap<Stage, UserId>,
}

impl ResolvedApprovers {
    pub fn with(mut self, stage: Stage, approver: Option<UserId>) -> Self {
        self.set(stage, approver);
        self
    }

    pub fn set(&mut self, stage: Stage, approver: Option<UserId>) {
        match approver {
            Some(approver) => {
                self.approvers.insert(stage, approver);
            }
            None => {
                self.approvers.remove(&stage);
            }
        }
    }

    pub fn get(&self, stage: Stage) -> Option<&UserId> {
        self.approvers.get(&stage)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainPlan {
    pub stages: Vec<ApprovalStage>,
    pub missing_stages: Vec<Stage>,
}

/// Lays out the stage records for an approved request in pipeline order.
///
/// STORES mirrors the request-level decision and is created approved; the
/// rest start pending. A stage without a resolvable approver is left out.
pub fn plan_chain<F>(
    request: &Request,
    approvers: &ResolvedApprovers,
    now: DateTime<Utc>,
    mut next_id: F,
) -> Result<ChainPlan, DomainError>
where
    F: FnMut() -> StageId,
{
    if request.status != RequestStatus::Approved {
        return Err(DomainError::InvalidInput(format!(
            "request `{}` is {} and cannot start an approval chain",
            request.id,
            request.status.as_str()
        )));
    }

    let mut stages = Vec::with_capacity(Stage::PIPELINE.len());
    let mut missing_stages = Vec::new();

    for stage in Stage::PIPELINE {
        let Some(approver) = approvers.get(stage) else {
            missing_stages.push(stage);
            continue;
        };

        let (status, comment) = match stage {
            Stage::Stores => (StageStatus::Approved, STORES_AUTO_APPROVAL_COMMENT.to_string()),
            Stage::Procurement | Stage::Cfo => (StageStatus::Pending, String::new()),
        };

        stages.push(ApprovalStage {
            id: next_id(),
            request_id: request.id.clone(),
            stage,
            approver: approver.clone(),
            status,
            comment,
            created_at: now,
            updated_at: now,
        });
    }

    Ok(ChainPlan { stages, missing_stages })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        aggregate_status, authorize_stage_decision, is_stage_visible, plan_chain, role_for_stage,
        stage_for_role, ResolvedApprovers, StageAuthorizationFailure,
        STORES_AUTO_APPROVAL_COMMENT,
    };
    use crate::domain::actor::{Actor, Role, UserId};
    use crate::domain::approval::{AggregateStatus, ApprovalStage, Stage, StageId, StageStatus};
    use crate::domain::request::{ItemId, Priority, Request, RequestId, RequestStatus};

    fn approved_request() -> Request {
        let now = Utc::now();
        Request {
            id: RequestId("r-1".into()),
            requested_by: UserId("u-dean".into()),
            item_id: ItemId("item-toner".into()),
            quantity: 5,
            priority: Priority::Medium,
            reason: "Toner for the registry".into(),
            status: RequestStatus::Approved,
            stores_comment: "ok".into(),
            stores_reviewer: Some(UserId("u-stores".into())),
            created_at: now,
            updated_at: now,
        }
    }

    fn stage(stage: Stage, approver: &str, status: StageStatus) -> ApprovalStage {
        let now = Utc::now();
        ApprovalStage {
            id: StageId(format!("s-{}", stage.as_str())),
            request_id: RequestId("r-1".into()),
            stage,
            approver: UserId(approver.into()),
            status,
            comment: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn all_approvers() -> ResolvedApprovers {
        ResolvedApprovers::default()
            .with(Stage::Stores, Some(UserId("u-stores".into())))
            .with(Stage::Procurement, Some(UserId("u-proc".into())))
            .with(Stage::Cfo, Some(UserId("u-cfo".into())))
    }

    fn sequential_ids() -> impl FnMut() -> StageId {
        let mut counter = 0;
        move || {
            counter += 1;
            StageId(format!("stage-{counter}"))
        }
    }

    #[test]
    fn role_stage_mapping_round_trips_for_approver_roles() {
        for stage in Stage::PIPELINE {
            assert_eq!(stage_for_role(role_for_stage(stage)), Some(stage));
        }
        assert_eq!(stage_for_role(Role::Admin), None);
        assert_eq!(stage_for_role(Role::Requester), None);
    }

    #[test]
    fn plan_chain_creates_three_stages_in_order() {
        let plan =
            plan_chain(&approved_request(), &all_approvers(), Utc::now(), sequential_ids()).unwrap();

        let order: Vec<Stage> = plan.stages.iter().map(|stage| stage.stage).collect();
        assert_eq!(order, vec![Stage::Stores, Stage::Procurement, Stage::Cfo]);
        assert!(plan.missing_stages.is_empty());

        assert_eq!(plan.stages[0].status, StageStatus::Approved);
        assert_eq!(plan.stages[0].comment, STORES_AUTO_APPROVAL_COMMENT);
        assert_eq!(plan.stages[1].status, StageStatus::Pending);
        assert_eq!(plan.stages[2].status, StageStatus::Pending);
        assert!(plan.stages[2].comment.is_empty());
    }

    #[test]
    fn plan_chain_skips_stage_without_approver() {
        let approvers = all_approvers().with(Stage::Procurement, None);
        let plan = plan_chain(&approved_request(), &approvers, Utc::now(), sequential_ids()).unwrap();

        let order: Vec<Stage> = plan.stages.iter().map(|stage| stage.stage).collect();
        assert_eq!(order, vec![Stage::Stores, Stage::Cfo]);
        assert_eq!(plan.missing_stages, vec![Stage::Procurement]);
    }

    #[test]
    fn plan_chain_refuses_unapproved_request() {
        let mut request = approved_request();
        request.status = RequestStatus::Rejected;
        let error = plan_chain(&request, &all_approvers(), Utc::now(), sequential_ids()).unwrap_err();
        assert_eq!(error.kind(), "invalid_input");
    }

    #[test]
    fn decision_requires_assignment_and_matching_role() {
        let cfo_stage = stage(Stage::Cfo, "u-cfo", StageStatus::Pending);

        assert!(authorize_stage_decision(&Actor::new("u-cfo", Role::CfoReviewer), &cfo_stage).is_ok());
        assert!(matches!(
            authorize_stage_decision(&Actor::new("u-other-cfo", Role::CfoReviewer), &cfo_stage),
            Err(StageAuthorizationFailure::NotAssignedApprover { .. })
        ));
        assert!(matches!(
            authorize_stage_decision(&Actor::new("u-cfo", Role::ProcurementReviewer), &cfo_stage),
            Err(StageAuthorizationFailure::StageMismatch { .. })
        ));
        assert!(matches!(
            authorize_stage_decision(&Actor::new("u-cfo", Role::Admin), &cfo_stage),
            Err(StageAuthorizationFailure::NoStageForRole { role: Role::Admin })
        ));
    }

    #[test]
    fn stores_stage_cannot_be_decided_by_later_stage_roles() {
        let stores_stage = stage(Stage::Stores, "u-proc", StageStatus::Approved);
        for role in [Role::ProcurementReviewer, Role::CfoReviewer] {
            assert!(authorize_stage_decision(&Actor::new("u-proc", role), &stores_stage).is_err());
        }
    }

    #[test]
    fn visibility_matches_admin_and_assignment_rules() {
        let proc_stage = stage(Stage::Procurement, "u-proc", StageStatus::Pending);

        assert!(is_stage_visible(&Actor::new("u-admin", Role::Admin), &proc_stage));
        assert!(is_stage_visible(&Actor::new("u-proc", Role::ProcurementReviewer), &proc_stage));
        assert!(!is_stage_visible(&Actor::new("u-proc-2", Role::ProcurementReviewer), &proc_stage));
        assert!(!is_stage_visible(&Actor::new("u-proc", Role::CfoReviewer), &proc_stage));
        assert!(!is_stage_visible(&Actor::new("u-dean", Role::Requester), &proc_stage));
    }

    #[test]
    fn aggregate_status_derivation() {
        let approved = stage(Stage::Stores, "a", StageStatus::Approved);
        let pending = stage(Stage::Procurement, "b", StageStatus::Pending);
        let rejected = stage(Stage::Cfo, "c", StageStatus::Rejected);

        assert_eq!(aggregate_status(&[]), AggregateStatus::InProgress);
        assert_eq!(
            aggregate_status(&[approved.clone(), pending.clone()]),
            AggregateStatus::InProgress
        );
        assert_eq!(
            aggregate_status(&[approved.clone(), pending, rejected]),
            AggregateStatus::Blocked
        );
        assert_eq!(aggregate_status(&[approved.clone()]), AggregateStatus::InProgress);

        let full = [
            approved,
            stage(Stage::Procurement, "b", StageStatus::Approved),
            stage(Stage::Cfo, "c", StageStatus::Approved),
        ];
        assert_eq!(aggregate_status(&full), AggregateStatus::FullyApproved);
    }

    #[test]
    fn degraded_chain_never_fully_approves() {
        let stages = [
            stage(Stage::Stores, "a", StageStatus::Approved),
            stage(Stage::Cfo, "c", StageStatus::Approved),
        ];

        assert_eq!(aggregate_status(&stages), AggregateStatus::InProgress);
    }
}
