use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::models::{SyncError, User};

/// Durable store of users, consulted when resolving an auth token.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, SyncError>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
}

/// Postgres-backed user repository.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, SyncError> {
        let row: Option<UserRow> =
            sqlx::query_as("select id, username, email from users where id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| User {
            id: r.id,
            username: r.username,
            email: r.email,
        }))
    }
}
