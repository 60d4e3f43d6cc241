use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use stockflow_core::domain::actor::UserId;
use stockflow_core::domain::approval::{ApprovalStage, Stage, StageId, StageStatus};
use stockflow_core::domain::request::RequestId;

use super::{
    parse_timestamp, sort_pipeline, ApprovalStageRepository, ChainInsert, GuardedWrite,
    RepositoryError, StageFilter,
};
use crate::DbPool;

const STAGE_COLUMNS: &str =
    "id, request_id, stage, approver, status, comment, created_at, updated_at";

pub struct SqlApprovalStageRepository {
    pool: DbPool,
}

impl SqlApprovalStageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_stage(row: &SqliteRow) -> Result<ApprovalStage, RepositoryError> {
    let stage: String = row.try_get("stage")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ApprovalStage {
        id: StageId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        stage: Stage::parse(&stage)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown stage `{stage}`")))?,
        approver: UserId(row.try_get("approver")?),
        status: StageStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown stage status `{status}`")))?,
        comment: row.try_get("comment")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ApprovalStageRepository for SqlApprovalStageRepository {
    async fn find_by_id(&self, id: &StageId) -> Result<Option<ApprovalStage>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {STAGE_COLUMNS} FROM approval_stage WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_stage).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalStage>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STAGE_COLUMNS} FROM approval_stage WHERE request_id = ?"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut stages = rows.iter().map(row_to_stage).collect::<Result<Vec<_>, _>>()?;
        sort_pipeline(&mut stages);
        Ok(stages)
    }

    async fn list(&self, filter: StageFilter) -> Result<Vec<ApprovalStage>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {STAGE_COLUMNS} FROM approval_stage WHERE 1 = 1"));
        if let Some(approver) = &filter.approver {
            builder.push(" AND approver = ").push_bind(approver.0.clone());
        }
        if let Some(stage) = filter.stage {
            builder.push(" AND stage = ").push_bind(stage.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(
            " ORDER BY created_at DESC, request_id ASC, \
             CASE stage WHEN 'stores' THEN 0 WHEN 'procurement' THEN 1 ELSE 2 END ASC",
        );

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_stage).collect()
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

        // The first statement is a write so the transaction takes the write
        // lock before it reads anything; a concurrent builder waits on
        // busy_timeout and then sees our rows as conflicts.
        let mut tx = self.pool.begin().await?;
        let mut skipped = false;

        for stage in &stages {
            let inserted = sqlx::query(
                "INSERT INTO approval_stage (
                    id, request_id, stage, approver, status, comment, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(request_id, stage) DO NOTHING",
            )
            .bind(&stage.id.0)
            .bind(&stage.request_id.0)
            .bind(stage.stage.as_str())
            .bind(&stage.approver.0)
            .bind(stage.status.as_str())
            .bind(&stage.comment)
            .bind(stage.created_at.to_rfc3339())
            .bind(stage.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                skipped = true;
                break;
            }
        }

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM approval_stage WHERE request_id = ?")
                .bind(&request_id.0)
                .fetch_one(&mut *tx)
                .await?;

        if skipped || usize::try_from(total).ok() != Some(stages.len()) {
            tx.rollback().await?;
            return Ok(ChainInsert::Existing(self.list_for_request(request_id).await?));
        }

        tx.commit().await?;
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
        // The re-read shares the write's transaction so `Applied` reports this
        // caller's write, not a decision that landed afterwards.
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE approval_stage
             SET status = ?, comment = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(comment)
        .bind(decided_at.to_rfc3339())
        .bind(&id.0)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!("SELECT {STAGE_COLUMNS} FROM approval_stage WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let current = row.as_ref().map(row_to_stage).transpose()?;
        tx.commit().await?;

        Ok(match (result.rows_affected(), current) {
            (_, None) => GuardedWrite::Missing,
            (0, Some(stage)) => GuardedWrite::AlreadyDecided(stage),
            (_, Some(stage)) => GuardedWrite::Applied(stage),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use stockflow_core::domain::actor::{Actor, Role, UserId};
    use stockflow_core::domain::approval::{ApprovalStage, Stage, StageId, StageStatus};
    use stockflow_core::domain::request::{NewRequest, Priority, Request, RequestId};

    use super::SqlApprovalStageRepository;
    use crate::fixtures::DemoDirectory;
    use crate::repositories::{
        ApprovalStageRepository, ChainInsert, GuardedWrite, RequestRepository, SqlRequestRepository,
        StageFilter,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoDirectory::load(&pool).await.expect("seed users");

        let request = Request::open(
            RequestId("r-1".into()),
            &Actor::new(DemoDirectory::REQUESTER, Role::Requester),
            NewRequest {
                item_id: "item-toner".into(),
                quantity: 5,
                priority: Priority::Medium,
                reason: "Registry printer".into(),
            },
            Utc::now(),
        )
        .expect("valid request");
        SqlRequestRepository::new(pool.clone()).insert(request).await.expect("insert request");
        pool
    }

    fn chain(prefix: &str) -> Vec<ApprovalStage> {
        let now = Utc::now();
        [
            (Stage::Stores, DemoDirectory::STORES, StageStatus::Approved),
            (Stage::Procurement, DemoDirectory::PROCUREMENT, StageStatus::Pending),
            (Stage::Cfo, DemoDirectory::CFO, StageStatus::Pending),
        ]
        .into_iter()
        .map(|(stage, approver, status)| ApprovalStage {
            id: StageId(format!("{prefix}-{}", stage.as_str())),
            request_id: RequestId("r-1".into()),
            stage,
            approver: UserId(approver.into()),
            status,
            comment: String::new(),
            created_at: now,
            updated_at: now,
        })
        .collect()
    }

    #[tokio::test]
    async fn insert_chain_is_idempotent() {
        let repo = SqlApprovalStageRepository::new(setup().await);
        let request_id = RequestId("r-1".into());

        let first = repo.insert_chain(&request_id, chain("a")).await.expect("first build");
        let second = repo.insert_chain(&request_id, chain("b")).await.expect("second build");

        assert!(matches!(first, ChainInsert::Created(ref stages) if stages.len() == 3));
        match second {
            ChainInsert::Existing(stages) => {
                let ids: Vec<_> = stages.iter().map(|stage| stage.id.0.as_str()).collect();
                assert_eq!(ids, vec!["a-stores", "a-procurement", "a-cfo"]);
            }
            other => panic!("expected existing chain, got {other:?}"),
        }
        assert_eq!(repo.list_for_request(&request_id).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn partial_chain_blocks_a_second_build() {
        let repo = SqlApprovalStageRepository::new(setup().await);
        let request_id = RequestId("r-1".into());
        let mut degraded = chain("a");
        degraded.truncate(2);
        repo.insert_chain(&request_id, degraded).await.expect("degraded build");

        let rebuilt = repo.insert_chain(&request_id, chain("b")).await.expect("rebuild");
        assert!(matches!(rebuilt, ChainInsert::Existing(ref stages) if stages.len() == 2));
    }

    #[tokio::test]
    async fn record_decision_only_moves_pending_stages() {
        let repo = SqlApprovalStageRepository::new(setup().await);
        repo.insert_chain(&RequestId("r-1".into()), chain("a")).await.expect("build");
        let stage_id = StageId("a-cfo".into());

        let decided = repo
            .record_decision(&stage_id, StageStatus::Rejected, "over budget", Utc::now())
            .await
            .expect("decide");
        assert!(matches!(decided, GuardedWrite::Applied(ref stage)
            if stage.status == StageStatus::Rejected && stage.comment == "over budget"));

        let again = repo
            .record_decision(&stage_id, StageStatus::Approved, "retry", Utc::now())
            .await
            .expect("second decide");
        assert!(matches!(again, GuardedWrite::AlreadyDecided(ref stage)
            if stage.status == StageStatus::Rejected));

        let stores = repo
            .record_decision(&StageId("a-stores".into()), StageStatus::Rejected, "", Utc::now())
            .await
            .expect("stores decide");
        assert!(matches!(stores, GuardedWrite::AlreadyDecided(_)));

        let missing = repo
            .record_decision(&StageId("ghost".into()), StageStatus::Approved, "", Utc::now())
            .await
            .expect("missing decide");
        assert_eq!(missing, GuardedWrite::Missing);
    }

    #[tokio::test]
    async fn resubmission_reports_its_own_write() {
        let repo = SqlApprovalStageRepository::new(setup().await);
        repo.insert_chain(&RequestId("r-1".into()), chain("a")).await.expect("build");
        let stage_id = StageId("a-procurement".into());

        let annotated = repo
            .record_decision(&stage_id, StageStatus::Pending, "split the order", Utc::now())
            .await
            .expect("annotate");
        assert!(matches!(annotated, GuardedWrite::Applied(ref stage)
            if stage.status == StageStatus::Pending && stage.comment == "split the order"));

        let decided = repo
            .record_decision(&stage_id, StageStatus::Approved, "fine", Utc::now())
            .await
            .expect("decide after annotation");
        assert!(matches!(decided, GuardedWrite::Applied(ref stage)
            if stage.status == StageStatus::Approved && stage.comment == "fine"));
    }

    #[tokio::test]
    async fn list_keeps_pipeline_order_within_a_chain() {
        let repo = SqlApprovalStageRepository::new(setup().await);
        let mut reversed = chain("a");
        reversed.reverse();
        repo.insert_chain(&RequestId("r-1".into()), reversed).await.expect("build");

        let listed = repo.list(StageFilter::default()).await.expect("list");
        let order: Vec<Stage> = listed.iter().map(|stage| stage.stage).collect();
        assert_eq!(order, vec![Stage::Stores, Stage::Procurement, Stage::Cfo]);
    }

    #[tokio::test]
    async fn list_filters_by_approver_and_status() {
        let repo = SqlApprovalStageRepository::new(setup().await);
        repo.insert_chain(&RequestId("r-1".into()), chain("a")).await.expect("build");

        let procurement_pending = repo
            .list(StageFilter {
                approver: Some(UserId(DemoDirectory::PROCUREMENT.into())),
                stage: Some(Stage::Procurement),
                status: Some(StageStatus::Pending),
            })
            .await
            .expect("list");
        assert_eq!(procurement_pending.len(), 1);

        let approved = repo
            .list(StageFilter { status: Some(StageStatus::Approved), ..StageFilter::default() })
            .await
            .expect("list approved");
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].stage, Stage::Stores);
    }
}
