use sqlx::postgres::PgExecutor;
use crate::models::file_chunk::{ChunkRecord, NewChunk};
use crate::utils::chunking::chunk_id;
use uuid::Uuid;

pub async fn create_file_chunk<'e, E: PgExecutor<'e>>(executor: E, chunk: &NewChunk) -> Result<ChunkRecord, sqlx::Error> {
    sqlx::query_as::<_, ChunkRecord>(
        r#"
        INSERT INTO chunks (chunk_id, file_id, chunk_index, size, checksum, primary_node_id, replica_node_ids)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING chunk_id, file_id, chunk_index, size, checksum, primary_node_id, replica_node_ids, created_at
        "#,
    )
        .bind(chunk_id(&chunk.file_id, chunk.chunk_index as usize))
        .bind(chunk.file_id)
        .bind(chunk.chunk_index)
        .bind(chunk.size)
        .bind(&chunk.checksum)
        .bind(&chunk.primary_node_id)
        .bind(&chunk.replica_node_ids)
        .fetch_one(executor)
        .await
}

pub async fn get_chunks_by_file_id<'e, E: PgExecutor<'e>>(executor: E, file_id: Uuid) -> Result<Vec<ChunkRecord>, sqlx::Error> {
    sqlx::query_as::<_, ChunkRecord>(
        r#"
        SELECT chunk_id, file_id, chunk_index, size, checksum, primary_node_id, replica_node_ids, created_at
        FROM chunks
        WHERE file_id = $1
        ORDER BY chunk_index
        "#,
    )
        .bind(file_id)
        .fetch_all(executor)
        .await
}

pub async fn get_chunk<'e, E: PgExecutor<'e>>(executor: E, chunk_id: &str) -> Result<Option<ChunkRecord>, sqlx::Error> {
    sqlx::query_as::<_, ChunkRecord>(
        r#"
        SELECT chunk_id, file_id, chunk_index, size, checksum, primary_node_id, replica_node_ids, created_at
        FROM chunks
        WHERE chunk_id = $1
        "#,
    )
        .bind(chunk_id)
        .fetch_optional(executor)
        .await
}

pub async fn get_chunks_for_files<'e, E: PgExecutor<'e>>(executor: E, file_ids: &[Uuid]) -> Result<Vec<ChunkRecord>, sqlx::Error> {
    sqlx::query_as::<_, ChunkRecord>(
        r#"
        SELECT chunk_id, file_id, chunk_index, size, checksum, primary_node_id, replica_node_ids, created_at
        FROM chunks
        WHERE file_id = ANY($1)
        ORDER BY file_id, chunk_index
        "#,
    )
        .bind(file_ids)
        .fetch_all(executor)
        .await
}

pub async fn delete_chunks_for_files<'e, E: PgExecutor<'e>>(executor: E, file_ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM chunks WHERE file_id = ANY($1)")
        .bind(file_ids)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
