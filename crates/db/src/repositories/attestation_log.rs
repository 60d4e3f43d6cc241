use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use stockflow_core::domain::actor::UserId;
use stockflow_core::domain::attestation::{AttestationEventType, AttestationRecord, TransactionId};
use stockflow_core::domain::request::{ItemId, RequestId};

use super::{parse_timestamp, AttestationLogRepository, RepositoryError};
use crate::DbPool;

const RECORD_COLUMNS: &str = "id, event_type, transaction_id, request_id, item_id, initiated_by,
     payload_json, simulated, logged_at";

pub struct SqlAttestationLogRepository {
    pool: DbPool,
}

impl SqlAttestationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<AttestationRecord, RepositoryError> {
    let event_type: String = row.try_get("event_type")?;
    let request_id: Option<String> = row.try_get("request_id")?;
    let item_id: Option<String> = row.try_get("item_id")?;
    let payload_json: String = row.try_get("payload_json")?;
    let simulated: i64 = row.try_get("simulated")?;
    let logged_at: String = row.try_get("logged_at")?;

    Ok(AttestationRecord {
        id: row.try_get("id")?,
        event_type: AttestationEventType::parse(&event_type)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown event type `{event_type}`")))?,
        transaction_id: TransactionId(row.try_get("transaction_id")?),
        request_id: request_id.map(RequestId),
        item_id: item_id.map(ItemId),
        initiated_by: UserId(row.try_get("initiated_by")?),
        payload: serde_json::from_str(&payload_json)
            .map_err(|error| RepositoryError::Decode(format!("payload_json: {error}")))?,
        simulated: simulated != 0,
        logged_at: parse_timestamp("logged_at", &logged_at)?,
    })
}

#[async_trait::async_trait]
impl AttestationLogRepository for SqlAttestationLogRepository {
    async fn append(&self, record: AttestationRecord) -> Result<(), RepositoryError> {
        let payload_json = serde_json::to_string(&record.payload)
            .map_err(|error| RepositoryError::Decode(format!("payload_json: {error}")))?;

        let result = sqlx::query(
            "INSERT INTO attestation_log (
                id, event_type, transaction_id, request_id, item_id, initiated_by,
                payload_json, simulated, logged_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(transaction_id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(record.event_type.as_str())
        .bind(&record.transaction_id.0)
        .bind(record.request_id.as_ref().map(|id| id.0.as_str()))
        .bind(record.item_id.as_ref().map(|id| id.0.as_str()))
        .bind(&record.initiated_by.0)
        .bind(payload_json)
        .bind(i64::from(record.simulated))
        .bind(record.logged_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "transaction `{}` is already logged",
                record.transaction_id
            )));
        }
        Ok(())
    }

    async fn find_by_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<AttestationRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM attestation_log WHERE transaction_id = ?"
        ))
        .bind(&transaction_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AttestationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM attestation_log WHERE request_id = ? ORDER BY logged_at ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use stockflow_core::domain::actor::UserId;
    use stockflow_core::domain::attestation::{
        AttestationEventType, AttestationRecord, TransactionId,
    };
    use stockflow_core::domain::request::ItemId;

    use super::SqlAttestationLogRepository;
    use crate::repositories::{AttestationLogRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    fn damage_record(id: &str, transaction: &str) -> AttestationRecord {
        AttestationRecord {
            id: id.to_string(),
            event_type: AttestationEventType::Damage,
            transaction_id: TransactionId(transaction.to_string()),
            request_id: None,
            item_id: Some(ItemId("item-9".into())),
            initiated_by: UserId("u-stores".into()),
            payload: json!({"type": "damage", "severity": "MINOR"}),
            simulated: true,
            logged_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transaction_ids_are_unique() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlAttestationLogRepository::new(pool);

        repo.append(damage_record("log-1", "0xabc")).await.expect("append");
        let duplicate = repo.append(damage_record("log-2", "0xabc")).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

        let stored = repo
            .find_by_transaction(&TransactionId("0xabc".into()))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(stored.id, "log-1");
        assert!(stored.simulated);
        assert_eq!(stored.payload["severity"], "MINOR");
    }
}
