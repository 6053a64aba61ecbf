use sqlx::postgres::PgExecutor;
use chrono::{DateTime, Utc};
use crate::models::node::StorageNode;

pub async fn upsert_node<'e, E: PgExecutor<'e>>(executor: E, node: &StorageNode) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO storage_nodes (node_id, host, port, capacity, used, cpu_cores, health_score, chunk_count, last_heartbeat, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (node_id) DO UPDATE
        SET host = EXCLUDED.host,
            port = EXCLUDED.port,
            capacity = EXCLUDED.capacity,
            cpu_cores = EXCLUDED.cpu_cores,
            last_heartbeat = EXCLUDED.last_heartbeat
        "#,
    )
        .bind(&node.node_id)
        .bind(&node.host)
        .bind(node.port)
        .bind(node.capacity)
        .bind(node.used)
        .bind(node.cpu_cores)
        .bind(node.health_score)
        .bind(node.chunk_count)
        .bind(node.last_heartbeat)
        .bind(node.created_at)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn update_node_usage<'e, E: PgExecutor<'e>>(
    executor: E,
    node_id: &str,
    used: i64,
    chunk_count: i64,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE storage_nodes
        SET used = $2, chunk_count = $3, last_heartbeat = $4
        WHERE node_id = $1
        "#,
    )
        .bind(node_id)
        .bind(used)
        .bind(chunk_count)
        .bind(at)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_all_nodes<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<StorageNode>, sqlx::Error> {
    sqlx::query_as::<_, StorageNode>(
        r#"
        SELECT node_id, host, port, capacity, used, cpu_cores, health_score, chunk_count, last_heartbeat, created_at
        FROM storage_nodes
        ORDER BY created_at, node_id
        "#,
    )
        .fetch_all(executor)
        .await
}

pub async fn get_nodes_by_ids<'e, E: PgExecutor<'e>>(executor: E, node_ids: &[String]) -> Result<Vec<StorageNode>, sqlx::Error> {
    sqlx::query_as::<_, StorageNode>(
        r#"
        SELECT node_id, host, port, capacity, used, cpu_cores, health_score, chunk_count, last_heartbeat, created_at
        FROM storage_nodes
        WHERE node_id = ANY($1)
        "#,
    )
        .bind(node_ids)
        .fetch_all(executor)
        .await
}

pub async fn count_chunks_on_node<'e, E: PgExecutor<'e>>(executor: E, node_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM chunks WHERE primary_node_id = $1 OR $1 = ANY(replica_node_ids)",
    )
        .bind(node_id)
        .fetch_one(executor)
        .await
}

pub async fn delete_node<'e, E: PgExecutor<'e>>(executor: E, node_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM storage_nodes WHERE node_id = $1")
        .bind(node_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
