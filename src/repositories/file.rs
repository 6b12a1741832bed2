use deadpool_postgres::Pool;
use crate::error::Result;
use crate::models::file::{FileRecord, NewFileRecord};

/// Inserts a file record. The database assigns `id` and `created_at`.
///
/// # Arguments
///
/// * `pool` - The database connection pool.
/// * `record` - The uploader-supplied fields.
///
/// # Returns
///
/// A `Result` containing the stored `FileRecord`.
pub async fn insert_file(pool: &Pool, record: &NewFileRecord) -> Result<FileRecord> {
    let client = pool.get().await?;
    let statement = client
        .prepare_cached(
            r#"
            INSERT INTO files (name, path, type, size)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, path, type, size, created_at
            "#,
        )
        .await?;

    let row = client
        .query_one(
            &statement,
            &[&record.name, &record.path, &record.media_type, &record.size],
        )
        .await?;

    Ok(FileRecord::from(&row))
}

/// Lists every file record, newest first.
pub async fn list_newest_first(pool: &Pool) -> Result<Vec<FileRecord>> {
    let client = pool.get().await?;
    let statement = client
        .prepare_cached(
            r#"
            SELECT id, name, path, type, size, created_at
            FROM files
            ORDER BY created_at DESC
            "#,
        )
        .await?;

    let rows = client.query(&statement, &[]).await?;
    Ok(rows.iter().map(FileRecord::from).collect())
}

/// Finds the record pointing at a storage key.
pub async fn find_by_path(pool: &Pool, path: &str) -> Result<Option<FileRecord>> {
    let client = pool.get().await?;
    let statement = client
        .prepare_cached(
            r#"
            SELECT id, name, path, type, size, created_at
            FROM files
            WHERE path = $1
            "#,
        )
        .await?;

    let row = client.query_opt(&statement, &[&path]).await?;
    Ok(row.as_ref().map(FileRecord::from))
}
