use sqlx::postgres::PgExecutor;
use uuid::Uuid;
use crate::models::user::UserQuota;

pub async fn get_quota<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid) -> Result<Option<UserQuota>, sqlx::Error> {
    sqlx::query_as::<_, UserQuota>(
        "SELECT user_id, storage_allocated, storage_used FROM users WHERE user_id = $1",
    )
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

/// `None` when the user already uses more than `allocated`.
pub async fn set_allocation<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid, allocated: i64) -> Result<Option<UserQuota>, sqlx::Error> {
    sqlx::query_as::<_, UserQuota>(
        r#"
        INSERT INTO users (user_id, storage_allocated, storage_used)
        VALUES ($1, $2, 0)
        ON CONFLICT (user_id) DO UPDATE
        SET storage_allocated = EXCLUDED.storage_allocated
        WHERE users.storage_used <= EXCLUDED.storage_allocated
        RETURNING user_id, storage_allocated, storage_used
        "#,
    )
        .bind(user_id)
        .bind(allocated)
        .fetch_optional(executor)
        .await
}

// 单条 UPDATE 保证同一用户的并发上传不会超额
pub async fn reserve_quota<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid, bytes: i64) -> Result<Option<UserQuota>, sqlx::Error> {
    sqlx::query_as::<_, UserQuota>(
        r#"
        UPDATE users
        SET storage_used = storage_used + $2
        WHERE user_id = $1 AND storage_used + $2 <= storage_allocated
        RETURNING user_id, storage_allocated, storage_used
        "#,
    )
        .bind(user_id)
        .bind(bytes)
        .fetch_optional(executor)
        .await
}

pub async fn release_quota<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid, bytes: i64) -> Result<Option<UserQuota>, sqlx::Error> {
    sqlx::query_as::<_, UserQuota>(
        r#"
        UPDATE users
        SET storage_used = GREATEST(storage_used - $2, 0)
        WHERE user_id = $1
        RETURNING user_id, storage_allocated, storage_used
        "#,
    )
        .bind(user_id)
        .bind(bytes)
        .fetch_optional(executor)
        .await
}
