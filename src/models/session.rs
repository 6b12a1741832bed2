use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a user session.
///
/// Handed to handlers as an immutable request extension. Its presence is what
/// "signed in" means; the fields serve the HTTP layer only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// Token the client must echo in `x-csrf-token` on state-changing requests.
    pub csrf_token: String,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// A session freshly issued by the provider, together with its id.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub id: Uuid,
    pub session: Session,
}

/// How a session changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionChange {
    SignedIn,
    SignedOut,
    Expired,
}

impl SessionChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionChange::SignedIn => "signed_in",
            SessionChange::SignedOut => "signed_out",
            SessionChange::Expired => "expired",
        }
    }

    /// Whether a session exists after this change.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionChange::SignedIn)
    }
}

/// Pushed by the session provider whenever a session starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub change: SessionChange,
}
