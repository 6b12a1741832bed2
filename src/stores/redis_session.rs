use async_trait::async_trait;
use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{EVENT_CHANNEL_CAPACITY, SessionProvider};
use crate::crypto::{csrf, password};
use crate::error::{AppError, Result};
use crate::models::session::{IssuedSession, Session, SessionChange, SessionEvent};
use crate::repositories::user as user_repo;

/// How long a session key outlives `expires_at`.
const EXPIRY_GRACE_SECS: u64 = 3600;

fn session_key(session_id: Uuid) -> String {
    format!("session:{}", session_id)
}

/// Redis TTL for a session. The key stays past `expires_at` so a lookup can
/// still see the expired session, delete it and announce `Expired`.
fn key_ttl_secs(session_ttl_secs: u64) -> u64 {
    session_ttl_secs + EXPIRY_GRACE_SECS
}

/// Users in PostgreSQL, sessions in Redis with a TTL.
pub struct RedisSessionProvider {
    db: Pool,
    redis: ConnectionManager,
    session_ttl_secs: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl RedisSessionProvider {
    pub fn new(db: Pool, redis: ConnectionManager, session_ttl_secs: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            redis,
            session_ttl_secs,
            events,
        }
    }

    async fn issue(&self, user_id: Uuid) -> Result<IssuedSession> {
        let session_id = Uuid::new_v4();
        tracing::debug!("🔑 Generated session_id: {}", session_id);

        let now = Utc::now();
        let session = Session {
            user_id,
            csrf_token: csrf::generate_csrf_token(),
            created_at: now,
            expires_at: now + Duration::seconds(self.session_ttl_secs as i64),
        };

        let session_json = sonic_rs::to_string(&session)
            .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;

        let mut redis = self.redis.clone();
        let _: () = redis
            .set_ex(
                session_key(session_id),
                &session_json,
                key_ttl_secs(self.session_ttl_secs),
            )
            .await
            .map_err(|e| {
                tracing::error!("❌ Redis set_ex failed: {}", e);
                AppError::Auth(e.to_string())
            })?;

        tracing::info!("✅ Session saved to Redis: session:{}", session_id);
        self.publish(session_id, SessionChange::SignedIn);

        Ok(IssuedSession {
            id: session_id,
            session,
        })
    }

    fn publish(&self, session_id: Uuid, change: SessionChange) {
        let _ = self.events.send(SessionEvent { session_id, change });
    }
}

#[async_trait]
impl SessionProvider for RedisSessionProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<IssuedSession> {
        tracing::debug!("🔐 Creating user: {}", email);
        let password_hash = password::hash_password_blocking(password.to_string()).await?;

        let user = user_repo::create_user(&self.db, Uuid::new_v4(), email, &password_hash)
            .await
            .map_err(|e| e.into_auth())?;

        tracing::info!("✅ User created with ID: {}", user.id);
        self.issue(user.id).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<IssuedSession> {
        tracing::debug!("🔐 Authenticating user: {}", email);

        let user = user_repo::find_by_email(&self.db, email)
            .await
            .map_err(|e| e.into_auth())?
            .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

        if !password::verify_password_blocking(password.to_string(), user.password.clone()).await? {
            return Err(AppError::Authentication(
                "Invalid email or password".to_string(),
            ));
        }

        tracing::info!("✅ User authenticated: {}", user.id);
        self.issue(user.id).await
    }

    async fn sign_out(&self, session_id: Uuid) -> Result<()> {
        let mut redis = self.redis.clone();
        let removed: i64 = redis
            .del(session_key(session_id))
            .await
            .map_err(|e| AppError::Auth(e.to_string()))?;

        if removed > 0 {
            tracing::info!("✅ Session deleted from Redis");
            self.publish(session_id, SessionChange::SignedOut);
        }
        Ok(())
    }

    async fn current_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let mut redis = self.redis.clone();
        let session_json: Option<String> = redis
            .get(session_key(session_id))
            .await
            .map_err(|e| AppError::Auth(e.to_string()))?;

        let Some(session_json) = session_json else {
            return Ok(None);
        };

        let session: Session = match sonic_rs::from_str(&session_json) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("❌ Invalid session JSON: {}", e);
                return Ok(None);
            }
        };

        if session.is_expired() {
            tracing::warn!("❌ Session expired for user: {}", session.user_id);
            // Only the lookup that actually deletes the key announces the expiry.
            let removed: i64 = redis.del(session_key(session_id)).await.unwrap_or(0);
            if removed > 0 {
                self.publish(session_id, SessionChange::Expired);
            }
            return Ok(None);
        }

        Ok(Some(session))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
