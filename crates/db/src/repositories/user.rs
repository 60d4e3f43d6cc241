use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use stockflow_core::domain::actor::{Role, User, UserId};

use super::{parse_timestamp, RepositoryError, UserDirectory};
use crate::DbPool;

const USER_COLUMNS: &str = "id, username, role, attestation_address, created_at";

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(User {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        role: Role::parse(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role}`")))?,
        attestation_address: row.try_get("attestation_address")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn first_user_with_role(&self, role: Role) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE role = ? ORDER BY created_at ASC, id ASC LIMIT 1"
        ))
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn save_user(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, username, role, attestation_address, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 role = excluded.role,
                 attestation_address = excluded.attestation_address",
        )
        .bind(&user.id.0)
        .bind(&user.username)
        .bind(user.role.as_str())
        .bind(&user.attestation_address)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use stockflow_core::domain::actor::{Role, User, UserId};

    use super::SqlUserDirectory;
    use crate::repositories::UserDirectory;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn user(id: &str, role: Role, minutes_ago: i64) -> User {
        User {
            id: UserId(id.to_string()),
            username: id.trim_start_matches("u-").to_string(),
            role,
            attestation_address: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn first_user_with_role_prefers_earliest_registration() {
        let directory = SqlUserDirectory::new(setup().await);
        directory.save_user(user("u-cfo-late", Role::CfoReviewer, 1)).await.expect("save");
        directory.save_user(user("u-cfo-early", Role::CfoReviewer, 30)).await.expect("save");
        directory.save_user(user("u-dean", Role::Requester, 60)).await.expect("save");

        let cfo = directory
            .first_user_with_role(Role::CfoReviewer)
            .await
            .expect("query")
            .expect("cfo present");
        assert_eq!(cfo.id, UserId("u-cfo-early".into()));

        let procurement =
            directory.first_user_with_role(Role::ProcurementReviewer).await.expect("query");
        assert!(procurement.is_none());
    }

    #[tokio::test]
    async fn find_user_round_trips_role() {
        let directory = SqlUserDirectory::new(setup().await);
        let mut stores = user("u-stores", Role::StoresReviewer, 5);
        stores.attestation_address = Some("0xabc".into());
        directory.save_user(stores.clone()).await.expect("save");

        let found = directory.find_user(&stores.id).await.expect("find").expect("present");
        assert_eq!(found.role, Role::StoresReviewer);
        assert_eq!(found.attestation_address.as_deref(), Some("0xabc"));
        assert!(directory.find_user(&UserId("ghost".into())).await.expect("find").is_none());
        assert_eq!(directory.list_users().await.expect("list").len(), 1);
    }
}
