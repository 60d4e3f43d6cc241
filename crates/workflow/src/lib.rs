//! Stock request approval workflow: request lifecycle, chain materialization,
//! per-stage decisions and best-effort attestation.

pub mod chain;
pub mod recorder;
pub mod requests;
pub mod retry;
pub mod stages;

use std::sync::Arc;
use std::time::Duration;

use stockflow_core::attestation::AttestationClient;
use stockflow_core::audit::AuditSink;
use stockflow_core::domain::actor::{Actor, User, UserId};
use stockflow_core::domain::attestation::AttestationEvent;
use stockflow_core::errors::{ApplicationError, DomainError};
use stockflow_db::repositories::{
    ApprovalStageRepository, AttestationLogRepository, InMemoryApprovalStageRepository,
    InMemoryAttestationLogRepository, InMemoryRequestRepository, InMemoryUserDirectory,
    RequestRepository, SqlApprovalStageRepository, SqlAttestationLogRepository,
    SqlRequestRepository, SqlUserDirectory, UserDirectory,
};
use stockflow_db::DbPool;
use tracing::info;

pub use chain::{ApprovalChainBuilder, ChainBuild};
pub use recorder::{AttestationOutcome, AttestationRecorder};
pub use requests::{RequestStore, StoresOutcome};
pub use retry::{RetryPolicy, RetryingAttestationClient};
pub use stages::{ApprovalStateMachine, ChainSummary, StageDecision};

/// Storage handles the workflow runs against.
#[derive(Clone)]
pub struct Repositories {
    pub directory: Arc<dyn UserDirectory>,
    pub requests: Arc<dyn RequestRepository>,
    pub stages: Arc<dyn ApprovalStageRepository>,
    pub attestations: Arc<dyn AttestationLogRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            directory: Arc::new(SqlUserDirectory::new(pool.clone())),
            requests: Arc::new(SqlRequestRepository::new(pool.clone())),
            stages: Arc::new(SqlApprovalStageRepository::new(pool.clone())),
            attestations: Arc::new(SqlAttestationLogRepository::new(pool)),
        }
    }

    pub fn in_memory(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            directory: Arc::new(InMemoryUserDirectory::with_users(users)),
            requests: Arc::new(InMemoryRequestRepository::default()),
            stages: Arc::new(InMemoryApprovalStageRepository::default()),
            attestations: Arc::new(InMemoryAttestationLogRepository::default()),
        }
    }
}

/// Fully wired workflow, shared by every transport.
#[derive(Clone)]
pub struct WorkflowServices {
    pub directory: Arc<dyn UserDirectory>,
    pub requests: Arc<RequestStore>,
    pub chains: Arc<ApprovalChainBuilder>,
    pub stages: Arc<ApprovalStateMachine>,
}

impl WorkflowServices {
    pub fn new(
        repositories: Repositories,
        client: Arc<dyn AttestationClient>,
        audit: Arc<dyn AuditSink>,
        attestation_deadline: Duration,
    ) -> Self {
        let chains = Arc::new(ApprovalChainBuilder::new(
            repositories.directory.clone(),
            repositories.requests.clone(),
            repositories.stages.clone(),
            audit.clone(),
        ));
        let recorder = AttestationRecorder::new(client, repositories.attestations)
            .with_deadline(attestation_deadline);

        Self {
            directory: repositories.directory,
            requests: Arc::new(RequestStore::new(
                repositories.requests.clone(),
                chains.clone(),
                audit.clone(),
            )),
            chains,
            stages: Arc::new(ApprovalStateMachine::new(
                repositories.stages,
                repositories.requests,
                recorder,
                audit,
            )),
        }
    }

    /// Maps a caller-supplied user id to an actor. Unknown ids are refused.
    pub async fn resolve_actor(&self, id: &UserId) -> Result<Actor, ApplicationError> {
        match self.directory.find_user(id).await? {
            Some(user) => Ok(user.actor()),
            None => Err(DomainError::unauthorized(format!("unknown actor `{id}`")).into()),
        }
    }

    pub fn recorder(&self) -> &AttestationRecorder {
        self.stages.recorder()
    }

    /// Attests a delivery, relocation or damage report made by stores staff.
    /// Approval events only come from stage decisions.
    pub async fn attest_inventory_event(
        &self,
        actor: &Actor,
        event: AttestationEvent,
    ) -> Result<AttestationOutcome, ApplicationError> {
        if !actor.role.can_decide_requests() {
            return Err(DomainError::unauthorized(format!(
                "role `{}` cannot report inventory events",
                actor.role
            ))
            .into());
        }
        if matches!(event, AttestationEvent::Approval { .. }) {
            return Err(DomainError::InvalidInput(
                "approval events are recorded by stage decisions".to_string(),
            )
            .into());
        }
        if let Some(request_id) = event.request_id() {
            self.requests.get(actor, request_id).await?;
        }

        let subject = event.subject_key();
        let outcome = self.recorder().record(&actor.id, event).await;
        info!(
            event_name = "workflow.inventory_event.attested",
            correlation_id = %subject,
            actor = %actor.id,
            "inventory event handed to attestation"
        );
        Ok(outcome)
    }
}
