use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use stockflow_core::domain::actor::{Role, User, UserId};
use stockflow_core::domain::approval::{ApprovalStage, StageId, StageStatus};
use stockflow_core::domain::attestation::{AttestationRecord, TransactionId};
use stockflow_core::domain::request::{Request, RequestId, RequestStatus};

use super::{
    sort_pipeline, ApprovalStageRepository, AttestationLogRepository, ChainInsert, GuardedWrite,
    RepositoryError, RequestFilter, RequestRepository, StageFilter, UserDirectory,
};

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserDirectory {
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|user| (user.id.0.clone(), user)).collect();
        Self { users: RwLock::new(users) }
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn first_user_with_role(&self, role: Role) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|user| user.role == role)
            .min_by(|left, right| {
                left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
            })
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut listed: Vec<User> = users.values().cloned().collect();
        listed.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn save_user(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, Request>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn insert(&self, request: Request) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "request `{}` already exists",
                request.id
            )));
        }
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn list(&self, filter: RequestFilter) -> Result<Vec<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut listed: Vec<Request> =
            requests.values().filter(|request| filter.matches(request)).cloned().collect();
        listed.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.cmp(&left.id))
        });
        Ok(listed)
    }

    async fn record_stores_decision(
        &self,
        id: &RequestId,
        status: RequestStatus,
        reviewer: &UserId,
        comment: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<GuardedWrite<Request>, RepositoryError> {
        let mut requests = self.requests.write().await;
        let Some(request) = requests.get_mut(&id.0) else {
            return Ok(GuardedWrite::Missing);
        };
        if request.status != RequestStatus::Pending {
            return Ok(GuardedWrite::AlreadyDecided(request.clone()));
        }

        request.status = status;
        request.stores_comment = comment.to_string();
        request.stores_reviewer = Some(reviewer.clone());
        request.updated_at = decided_at;
        Ok(GuardedWrite::Applied(request.clone()))
    }

    async fn update_pending_details(
        &self,
        request: &Request,
    ) -> Result<GuardedWrite<Request>, RepositoryError> {
        let mut requests = self.requests.write().await;
        let Some(stored) = requests.get_mut(&request.id.0) else {
            return Ok(GuardedWrite::Missing);
        };
        if stored.status != RequestStatus::Pending {
            return Ok(GuardedWrite::AlreadyDecided(stored.clone()));
        }

        stored.quantity = request.quantity;
        stored.priority = request.priority;
        stored.reason = request.reason.clone();
        stored.updated_at = request.updated_at;
        Ok(GuardedWrite::Applied(stored.clone()))
    }
}

/// Stage store whose write lock plays the role of the SQL `WHERE status = 'pending'`
/// guard: the check and the update happen under one lock acquisition.
#[derive(Default)]
pub struct InMemoryApprovalStageRepository {
    stages: RwLock<HashMap<String, ApprovalStage>>,
}

#[async_trait::async_trait]
impl ApprovalStageRepository for InMemoryApprovalStageRepository {
    async fn find_by_id(&self, id: &StageId) -> Result<Option<ApprovalStage>, RepositoryError> {
        let stages = self.stages.read().await;
        Ok(stages.get(&id.0).cloned())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalStage>, RepositoryError> {
        let stages = self.stages.read().await;
        let mut listed: Vec<ApprovalStage> =
            stages.values().filter(|stage| &stage.request_id == request_id).cloned().collect();
        sort_pipeline(&mut listed);
        Ok(listed)
    }

    async fn list(&self, filter: StageFilter) -> Result<Vec<ApprovalStage>, RepositoryError> {
        let stages = self.stages.read().await;
        let mut listed: Vec<ApprovalStage> =
            stages.values().filter(|stage| filter.matches(stage)).cloned().collect();
        listed.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| left.request_id.cmp(&right.request_id))
                .then_with(|| left.stage.cmp(&right.stage))
        });
        Ok(listed)
    }

    async fn insert_chain(
        &self,
        request_id: &RequestId,
        stages: Vec<ApprovalStage>,
    ) -> Result<ChainInsert, RepositoryError> {
        if let Some(foreign) = stages.iter().find(|stage| &stage.request_id != request_id) {
            return Err(RepositoryError::Conflict(format!(
                "stage `{}` belongs to request `{}`, not `{}`",
                foreign.id, foreign.request_id, request_id
            )));
        }

        let mut stored = self.stages.write().await;
        let mut existing: Vec<ApprovalStage> =
            stored.values().filter(|stage| &stage.request_id == request_id).cloned().collect();
        if !existing.is_empty() {
            sort_pipeline(&mut existing);
            return Ok(ChainInsert::Existing(existing));
        }

        for stage in &stages {
            stored.insert(stage.id.0.clone(), stage.clone());
        }
        let mut created = stages;
        sort_pipeline(&mut created);
        Ok(ChainInsert::Created(created))
    }

    async fn record_decision(
        &self,
        id: &StageId,
        status: StageStatus,
        comment: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<GuardedWrite<ApprovalStage>, RepositoryError> {
        let mut stages = self.stages.write().await;
        let Some(stage) = stages.get_mut(&id.0) else {
            return Ok(GuardedWrite::Missing);
        };
        if stage.status != StageStatus::Pending {
            return Ok(GuardedWrite::AlreadyDecided(stage.clone()));
        }

        stage.status = status;
        stage.comment = comment.to_string();
        stage.updated_at = decided_at;
        Ok(GuardedWrite::Applied(stage.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryAttestationLogRepository {
    records: RwLock<Vec<AttestationRecord>>,
}

impl InMemoryAttestationLogRepository {
    pub async fn records(&self) -> Vec<AttestationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AttestationLogRepository for InMemoryAttestationLogRepository {
    async fn append(&self, record: AttestationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.iter().any(|existing| existing.transaction_id == record.transaction_id) {
            return Err(RepositoryError::Conflict(format!(
                "transaction `{}` is already logged",
                record.transaction_id
            )));
        }
        records.push(record);
        Ok(())
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<AttestationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|record| &record.transaction_id == transaction_id).cloned())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AttestationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| record.request_id.as_ref() == Some(request_id))
            .cloned()
            .collect())
    }
}
