use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use uuid::Uuid;
use crate::{
    error::{AppError, Result},
    models::user::User,
};

/// Creates a new user in the database.
///
/// An already registered email surfaces as a validation error.
pub async fn create_user(
    pool: &Pool,
    id: Uuid,
    email: &str,
    password_hash: &str,
) -> Result<User> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO users (id, email, password)
            VALUES ($1, $2, $3)
            RETURNING id, email, password, created_at
            "#,
            &[&id, &email, &password_hash],
        )
        .await
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                AppError::Validation("An account with this email already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?;
    Ok(User::from(&row))
}

/// Finds a user by their email address.
pub async fn find_by_email(pool: &Pool, email: &str) -> Result<Option<User>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, email, password, created_at
            FROM users
            WHERE email = $1
            "#,
            &[&email],
        )
        .await?;
    Ok(row.as_ref().map(User::from))
}
