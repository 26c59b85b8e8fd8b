//! Wire types for the identity backend's REST surface, plus the in-process
//! auth-change notification fanned out by the identity client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Session, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordGrantRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshGrantRequest {
    pub refresh_token: String,
}

/// Profile metadata attached to a signup, stored by the backend alongside the
/// user record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub data: SignUpProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user: UserPayload,
}

impl SessionPayload {
    pub fn into_session(self) -> Session {
        Session {
            user_id: UserId(self.user.id),
            email: self.user.email.unwrap_or_default(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        }
    }
}

/// Signup responses carry tokens only when the backend issues a session
/// immediately; confirmation-gated backends return just the user record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SignUpResponseBody {
    pub fn into_session(self) -> Option<Session> {
        let access_token = self.access_token?;
        let (user_id, email) = match self.user {
            Some(user) => (user.id, user.email),
            None => (self.id?, self.email),
        };
        Some(Session {
            user_id: UserId(user_id),
            email: email.unwrap_or_default(),
            access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        })
    }
}

/// Error body shapes observed across identity backend versions; all fields
/// optional, decoded best-effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorBody {
    pub fn detail(&self) -> Option<&str> {
        self.msg
            .as_deref()
            .or(self.message.as_deref())
            .or(self.error_description.as_deref())
    }
}

/// Auth lifecycle notification: session established, refreshed, or cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}
