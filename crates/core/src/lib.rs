pub mod approvals;
pub mod attestation;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    aggregate_status, authorize_stage_decision, plan_chain, stage_for_role, ChainPlan,
    ResolvedApprovers, StageAuthorizationFailure,
};
pub use attestation::{
    AttestationClient, AttestationError, AttestationMode, SimulatedAttestationClient,
};
pub use domain::actor::{Actor, Role, User, UserId};
pub use domain::approval::{
    AggregateStatus, ApprovalStage, Stage, StageAction, StageId, StageStatus,
};
pub use domain::attestation::{AttestationEvent, AttestationRecord, TransactionId};
pub use domain::request::{Request, RequestId, RequestStatus, StoresDecision};
pub use errors::{ApplicationError, DomainError, InterfaceError};
