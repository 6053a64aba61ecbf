use sqlx::postgres::PgExecutor;
use crate::models::share::{FileShare, SharePermission};
use uuid::Uuid;

pub async fn upsert_share<'e, E: PgExecutor<'e>>(
    executor: E,
    file_id: Uuid,
    shared_by: Uuid,
    shared_with: Uuid,
    permission: SharePermission,
) -> Result<FileShare, sqlx::Error> {
    sqlx::query_as::<_, FileShare>(
        r#"
        INSERT INTO file_shares (share_id, file_id, shared_by, shared_with, permission)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (file_id, shared_with) DO UPDATE SET permission = EXCLUDED.permission
        RETURNING share_id, file_id, shared_by, shared_with, permission, created_at
        "#,
    )
        .bind(Uuid::new_v4())
        .bind(file_id)
        .bind(shared_by)
        .bind(shared_with)
        .bind(permission.as_str())
        .fetch_one(executor)
        .await
}

pub async fn find_share<'e, E: PgExecutor<'e>>(executor: E, file_id: Uuid, user_id: Uuid) -> Result<Option<FileShare>, sqlx::Error> {
    sqlx::query_as::<_, FileShare>(
        r#"
        SELECT share_id, file_id, shared_by, shared_with, permission, created_at
        FROM file_shares
        WHERE file_id = $1 AND shared_with = $2
        "#,
    )
        .bind(file_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

pub async fn delete_shares_for_files<'e, E: PgExecutor<'e>>(executor: E, file_ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM file_shares WHERE file_id = ANY($1)")
        .bind(file_ids)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
