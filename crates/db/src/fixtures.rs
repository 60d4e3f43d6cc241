use sqlx::Executor;

use stockflow_core::domain::actor::Role;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_USERS: &[(&str, Role)] = &[
    (DemoDirectory::STORES, Role::StoresReviewer),
    (DemoDirectory::PROCUREMENT, Role::ProcurementReviewer),
    (DemoDirectory::CFO, Role::CfoReviewer),
    (DemoDirectory::REQUESTER, Role::Requester),
    (DemoDirectory::ADMIN, Role::Admin),
];

/// Deterministic directory with one account per workflow role.
pub struct DemoDirectory;

impl DemoDirectory {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_directory.sql");

    pub const STORES: &str = "user-stores-01";
    pub const PROCUREMENT: &str = "user-procurement-01";
    pub const CFO: &str = "user-cfo-01";
    pub const REQUESTER: &str = "user-requester-01";
    pub const ADMIN: &str = "user-admin-01";

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            users_seeded: SEED_USERS.iter().map(|(id, role)| (*id, *role)).collect(),
        })
    }

    /// Checks that every seeded account exists with its expected role.
    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        for (id, role) in SEED_USERS {
            let present: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM app_user WHERE id = ?1 AND role = ?2)")
                    .bind(*id)
                    .bind(role.as_str())
                    .fetch_one(pool)
                    .await?;
            if present == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub users_seeded: Vec<(&'static str, Role)>,
}
