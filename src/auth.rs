//! Authentication module.
//!
//! Session issuance is kept deliberately small: the operator issues bearer
//! tokens for user IDs from the CLI, and the sync API resolves them here.

use crate::db::{Database, Session, now_timestamp};
use crate::error::{AppError, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Generate a secure random token.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    session_duration_days: u32,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, session_duration_days: u32) -> Self {
        Self {
            db,
            session_duration_days,
        }
    }

    /// Issue a token for a user ID.
    pub fn issue_token(&self, user_id: &str) -> Result<Session> {
        let user_id = user_id.trim();
        if user_id.is_empty() || user_id.len() > 64 {
            return Err(AppError::Validation(
                "User ID must be 1-64 characters".to_string(),
            ));
        }

        let session = Session {
            token: generate_token(),
            user_id: user_id.to_string(),
            expires_at: now_timestamp() + (self.session_duration_days as i64 * 24 * 60 * 60),
        };

        self.db.create_session(&session)?;
        tracing::info!(user_id = %session.user_id, "Issued sync token");
        Ok(session)
    }

    /// Validate a session token and return the user ID.
    pub fn validate_token(&self, token: &str) -> Result<Option<String>> {
        let session = match self.db.get_session(token)? {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.expires_at < now_timestamp() {
            self.db.delete_session(token)?;
            return Ok(None);
        }

        Ok(Some(session.user_id))
    }

    /// Revoke a token.
    pub fn revoke(&self, token: &str) -> Result<bool> {
        self.db.delete_session(token)
    }

    /// List live sessions.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.db.cleanup_expired_sessions()?;
        self.db.list_sessions()
    }
}
