//! User repository: OAuth-derived stored identities.

use super::DbError;
use sqlx::SqlitePool;

/// A stored user.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    /// Opaque public-key commitment registered at first sign-in.
    pub commitment: Option<String>,
    pub created_at: i64,
    pub is_active: bool,
}

type UserRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    bool,
);

fn from_row(row: UserRow) -> UserRecord {
    UserRecord {
        id: row.0,
        google_id: row.1,
        email: row.2,
        name: row.3,
        avatar: row.4,
        commitment: row.5,
        created_at: row.6,
        is_active: row.7,
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user (token issuance upserts by google_id upstream; here the
    /// row either exists or the insert is fresh).
    pub async fn create(
        &self,
        google_id: &str,
        email: &str,
        name: &str,
        avatar: Option<&str>,
        commitment: Option<&str>,
    ) -> Result<UserRecord, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO users (google_id, email, name, avatar, commitment, created_at, last_login)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(google_id)
        .bind(email)
        .bind(name)
        .bind(avatar)
        .bind(commitment)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.find_by_id(id).await?.ok_or(DbError::UserNotFound(id))
    }

    /// Look up a user by row id. Inactive users resolve as absent.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, google_id, email, name, avatar, commitment, created_at, is_active
            FROM users
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(from_row))
    }
}
