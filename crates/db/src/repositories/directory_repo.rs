//! Repository for `users` and `group_members`.

use formflow_core::types::DbId;
use sqlx::PgPool;

/// Read access to people and groups.
pub struct DirectoryRepo;

impl DirectoryRepo {
    /// The active manager of `user_id`, if one is recorded.
    pub async fn manager_of(pool: &PgPool, user_id: DbId) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT m.id FROM users u \
             JOIN users m ON m.id = u.manager_id \
             WHERE u.id = $1 AND m.is_active = true",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Email of an active user.
    pub async fn email_of(pool: &PgPool, user_id: DbId) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT email FROM users WHERE id = $1 AND is_active = true")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Distinct emails of active members across `group_ids`, sorted.
    pub async fn member_emails(pool: &PgPool, group_ids: &[DbId]) -> Result<Vec<String>, sqlx::Error> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_scalar(
            "SELECT DISTINCT u.email FROM group_members gm \
             JOIN users u ON u.id = gm.user_id \
             WHERE gm.group_id = ANY($1) AND u.is_active = true \
             ORDER BY u.email ASC",
        )
        .bind(group_ids)
        .fetch_all(pool)
        .await
    }
}
