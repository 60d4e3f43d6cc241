use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use stockflow_core::domain::actor::UserId;
use stockflow_core::domain::request::{ItemId, Priority, Request, RequestId, RequestStatus};

use super::{parse_timestamp, GuardedWrite, RepositoryError, RequestFilter, RequestRepository};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, requested_by, item_id, quantity, priority, reason, status,
     stores_comment, stores_reviewer, created_at, updated_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Re-reads a row after a guarded update to tell "lost the race" from
    /// "never existed".
    async fn classify_write(
        &self,
        id: &RequestId,
        rows_affected: u64,
    ) -> Result<GuardedWrite<Request>, RepositoryError> {
        let current = self.find_by_id(id).await?;
        Ok(match (rows_affected, current) {
            (_, None) => GuardedWrite::Missing,
            (0, Some(request)) => GuardedWrite::AlreadyDecided(request),
            (_, Some(request)) => GuardedWrite::Applied(request),
        })
    }
}

fn row_to_request(row: &SqliteRow) -> Result<Request, RepositoryError> {
    let quantity: i64 = row.try_get("quantity")?;
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let stores_reviewer: Option<String> = row.try_get("stores_reviewer")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Request {
        id: RequestId(row.try_get("id")?),
        requested_by: UserId(row.try_get("requested_by")?),
        item_id: ItemId(row.try_get("item_id")?),
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode(format!("quantity `{quantity}` out of range")))?,
        priority: Priority::parse(&priority)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority}`")))?,
        reason: row.try_get("reason")?,
        status: RequestStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status}`")))?,
        stores_comment: row.try_get("stores_comment")?,
        stores_reviewer: stores_reviewer.map(UserId),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert(&self, request: Request) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO department_request (
                id, requested_by, item_id, quantity, priority, reason, status,
                stores_comment, stores_reviewer, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.requested_by.0)
        .bind(&request.item_id.0)
        .bind(i64::from(request.quantity))
        .bind(request.priority.as_str())
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(&request.stores_comment)
        .bind(request.stores_reviewer.as_ref().map(|reviewer| reviewer.0.as_str()))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM department_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn list(&self, filter: RequestFilter) -> Result<Vec<Request>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM department_request WHERE 1 = 1"
        ));
        if let Some(owner) = &filter.requested_by {
            builder.push(" AND requested_by = ").push_bind(owner.0.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn record_stores_decision(
        &self,
        id: &RequestId,
        status: RequestStatus,
        reviewer: &UserId,
        comment: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<GuardedWrite<Request>, RepositoryError> {
        let result = sqlx::query(
            "UPDATE department_request
             SET status = ?, stores_comment = ?, stores_reviewer = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(comment)
        .bind(&reviewer.0)
        .bind(decided_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        self.classify_write(id, result.rows_affected()).await
    }

    async fn update_pending_details(
        &self,
        request: &Request,
    ) -> Result<GuardedWrite<Request>, RepositoryError> {
        let result = sqlx::query(
            "UPDATE department_request
             SET quantity = ?, priority = ?, reason = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(i64::from(request.quantity))
        .bind(request.priority.as_str())
        .bind(&request.reason)
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .execute(&self.pool)
        .await?;

        self.classify_write(&request.id, result.rows_affected()).await
    }
}
