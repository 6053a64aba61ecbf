use sqlx::postgres::PgExecutor;
use crate::models::folder::{Folder, FolderEntry};
use uuid::Uuid;

pub async fn create_folder<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    folder_name: &str,
    parent_folder_id: Option<Uuid>,
) -> Result<Folder, sqlx::Error> {
    sqlx::query_as::<_, Folder>(
        r#"
        INSERT INTO folders (folder_id, user_id, folder_name, parent_folder_id)
        VALUES ($1, $2, $3, $4)
        RETURNING folder_id, user_id, folder_name, parent_folder_id, created_at
        "#,
    )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(folder_name)
        .bind(parent_folder_id)
        .fetch_one(executor)
        .await
}

pub async fn get_folder<'e, E: PgExecutor<'e>>(executor: E, folder_id: Uuid) -> Result<Option<Folder>, sqlx::Error> {
    sqlx::query_as::<_, Folder>(
        "SELECT folder_id, user_id, folder_name, parent_folder_id, created_at FROM folders WHERE folder_id = $1",
    )
        .bind(folder_id)
        .fetch_optional(executor)
        .await
}

pub async fn list_child_folders<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    parent_folder_id: Option<Uuid>,
) -> Result<Vec<FolderEntry>, sqlx::Error> {
    sqlx::query_as::<_, FolderEntry>(
        r#"
        SELECT d.folder_id, d.user_id, d.folder_name, d.parent_folder_id, d.created_at,
               (SELECT COUNT(*) FROM files f WHERE f.parent_folder_id = d.folder_id AND f.deleted_at IS NULL) AS file_count
        FROM folders d
        WHERE d.user_id = $1 AND d.parent_folder_id IS NOT DISTINCT FROM $2
        ORDER BY d.folder_name
        "#,
    )
        .bind(user_id)
        .bind(parent_folder_id)
        .fetch_all(executor)
        .await
}
