use sqlx::postgres::PgExecutor;
use chrono::{DateTime, Utc};
use crate::models::file::{FileRecord, NewFile};
use uuid::Uuid;

pub async fn create_file<'e, E: PgExecutor<'e>>(executor: E, file_id: Uuid, file: &NewFile) -> Result<FileRecord, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        INSERT INTO files (file_id, user_id, filename, file_size, mime_type, parent_folder_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING file_id, user_id, filename, file_size, mime_type, parent_folder_id, is_shared, created_at, modified_at, deleted_at
        "#,
    )
        .bind(file_id)
        .bind(file.user_id)
        .bind(&file.filename)
        .bind(file.file_size)
        .bind(&file.mime_type)
        .bind(file.parent_folder_id)
        .fetch_one(executor)
        .await
}

pub async fn get_file_by_id<'e, E: PgExecutor<'e>>(executor: E, file_id: Uuid) -> Result<Option<FileRecord>, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT file_id, user_id, filename, file_size, mime_type, parent_folder_id, is_shared, created_at, modified_at, deleted_at
        FROM files
        WHERE file_id = $1
        "#,
    )
        .bind(file_id)
        .fetch_optional(executor)
        .await
}

pub async fn set_deleted_at<'e, E: PgExecutor<'e>>(
    executor: E,
    file_id: Uuid,
    deleted_at: Option<DateTime<Utc>>,
) -> Result<Option<FileRecord>, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        UPDATE files
        SET deleted_at = $2, modified_at = NOW()
        WHERE file_id = $1
        RETURNING file_id, user_id, filename, file_size, mime_type, parent_folder_id, is_shared, created_at, modified_at, deleted_at
        "#,
    )
        .bind(file_id)
        .bind(deleted_at)
        .fetch_optional(executor)
        .await
}

pub async fn mark_shared<'e, E: PgExecutor<'e>>(executor: E, file_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE files SET is_shared = TRUE, modified_at = NOW() WHERE file_id = $1")
        .bind(file_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Locks the rows a purge is about to remove.
pub async fn lock_owned_file<'e, E: PgExecutor<'e>>(executor: E, file_id: Uuid, user_id: Uuid) -> Result<Option<FileRecord>, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT file_id, user_id, filename, file_size, mime_type, parent_folder_id, is_shared, created_at, modified_at, deleted_at
        FROM files
        WHERE file_id = $1 AND user_id = $2
        FOR UPDATE
        "#,
    )
        .bind(file_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

pub async fn lock_trashed_files<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid) -> Result<Vec<FileRecord>, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT file_id, user_id, filename, file_size, mime_type, parent_folder_id, is_shared, created_at, modified_at, deleted_at
        FROM files
        WHERE user_id = $1 AND deleted_at IS NOT NULL
        ORDER BY deleted_at
        FOR UPDATE
        "#,
    )
        .bind(user_id)
        .fetch_all(executor)
        .await
}

pub async fn delete_files<'e, E: PgExecutor<'e>>(executor: E, file_ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM files WHERE file_id = ANY($1)")
        .bind(file_ids)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn list_folder_files<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    folder_id: Option<Uuid>,
    include_deleted: bool,
) -> Result<Vec<FileRecord>, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT file_id, user_id, filename, file_size, mime_type, parent_folder_id, is_shared, created_at, modified_at, deleted_at
        FROM files
        WHERE user_id = $1
          AND parent_folder_id IS NOT DISTINCT FROM $2
          AND ($3 OR deleted_at IS NULL)
        ORDER BY created_at DESC
        "#,
    )
        .bind(user_id)
        .bind(folder_id)
        .bind(include_deleted)
        .fetch_all(executor)
        .await
}

pub async fn list_shared_with<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid) -> Result<Vec<FileRecord>, sqlx::Error> {
    sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT f.file_id, f.user_id, f.filename, f.file_size, f.mime_type, f.parent_folder_id,
               f.is_shared, f.created_at, f.modified_at, f.deleted_at
        FROM files f
        JOIN file_shares s ON s.file_id = f.file_id
        WHERE s.shared_with = $1 AND f.deleted_at IS NULL
        ORDER BY s.created_at DESC
        "#,
    )
        .bind(user_id)
        .fetch_all(executor)
        .await
}
