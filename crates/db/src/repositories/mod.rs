use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockflow_core::domain::actor::{Role, User, UserId};
use stockflow_core::domain::approval::{ApprovalStage, Stage, StageId, StageStatus};
use stockflow_core::domain::attestation::{AttestationRecord, TransactionId};
use stockflow_core::domain::request::{Request, RequestId, RequestStatus};
use stockflow_core::errors::ApplicationError;

pub mod approval_stage;
pub mod attestation_log;
pub mod memory;
pub mod request;
pub mod user;

pub use approval_stage::SqlApprovalStageRepository;
pub use attestation_log::SqlAttestationLogRepository;
pub use memory::{
    InMemoryApprovalStageRepository, InMemoryAttestationLogRepository, InMemoryRequestRepository,
    InMemoryUserDirectory,
};
pub use request::SqlRequestRepository;
pub use user::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

/// Outcome of a status write guarded by `status = 'pending'`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardedWrite<T> {
    /// The row was pending and now holds the new values.
    Applied(T),
    /// The row had already left pending; carries its current state.
    AlreadyDecided(T),
    Missing,
}

/// Outcome of materializing an approval chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainInsert {
    Created(Vec<ApprovalStage>),
    /// Stages already existed for the request; nothing was written.
    Existing(Vec<ApprovalStage>),
}

impl ChainInsert {
    pub fn stages(&self) -> &[ApprovalStage] {
        match self {
            Self::Created(stages) | Self::Existing(stages) => stages,
        }
    }

    pub fn into_stages(self) -> Vec<ApprovalStage> {
        match self {
            Self::Created(stages) | Self::Existing(stages) => stages,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub requested_by: Option<UserId>,
    pub status: Option<RequestStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageFilter {
    pub approver: Option<UserId>,
    pub stage: Option<Stage>,
    pub status: Option<StageStatus>,
}

impl RequestFilter {
    pub fn matches(&self, request: &Request) -> bool {
        self.requested_by.as_ref().map_or(true, |owner| &request.requested_by == owner)
            && self.status.map_or(true, |status| request.status == status)
    }
}

impl StageFilter {
    pub fn matches(&self, stage: &ApprovalStage) -> bool {
        self.approver.as_ref().map_or(true, |approver| &stage.approver == approver)
            && self.stage.map_or(true, |value| stage.stage == value)
            && self.status.map_or(true, |status| stage.status == status)
    }
}

/// Read-only identity directory consumed by the workflow.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    /// Earliest-registered user holding `role`.
    async fn first_user_with_role(&self, role: Role) -> Result<Option<User>, RepositoryError>;
    async fn list_users(&self) -> Result<Vec<User>, RepositoryError>;
    async fn save_user(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, request: Request) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError>;
    /// Newest first.
    async fn list(&self, filter: RequestFilter) -> Result<Vec<Request>, RepositoryError>;
    async fn record_stores_decision(
        &self,
        id: &RequestId,
        status: RequestStatus,
        reviewer: &UserId,
        comment: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<GuardedWrite<Request>, RepositoryError>;
    /// Persists quantity, priority and reason of a still-pending request.
    async fn update_pending_details(
        &self,
        request: &Request,
    ) -> Result<GuardedWrite<Request>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalStageRepository: Send + Sync {
    async fn find_by_id(&self, id: &StageId) -> Result<Option<ApprovalStage>, RepositoryError>;
    /// Stages of one request in pipeline order.
    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalStage>, RepositoryError>;
    async fn list(&self, filter: StageFilter) -> Result<Vec<ApprovalStage>, RepositoryError>;
    /// Writes every stage or none. If any stage already exists for the request
    /// the existing set is returned untouched.
    async fn insert_chain(
        &self,
        request_id: &RequestId,
        stages: Vec<ApprovalStage>,
    ) -> Result<ChainInsert, RepositoryError>;
    async fn record_decision(
        &self,
        id: &StageId,
        status: StageStatus,
        comment: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<GuardedWrite<ApprovalStage>, RepositoryError>;
}

#[async_trait]
pub trait AttestationLogRepository: Send + Sync {
    async fn append(&self, record: AttestationRecord) -> Result<(), RepositoryError>;
    async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<AttestationRecord>, RepositoryError>;
    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AttestationRecord>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{value}`: {error}")))
}

pub(crate) fn sort_pipeline(stages: &mut [ApprovalStage]) {
    stages.sort_by_key(|stage| stage.stage.position());
}
