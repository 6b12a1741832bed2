use uuid::Uuid;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

/// Represents a user in the system.
#[derive(Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The email address the user signs in with.
    pub email: String,
    /// The argon2id hash of the user's password.
    pub password: String,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
}

impl From<&Row> for User {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            email: row.get("email"),
            password: row.get("password"),
            created_at: row.get("created_at"),
        }
    }
}
