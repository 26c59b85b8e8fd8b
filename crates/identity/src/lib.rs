//! HTTP client for the external identity backend.
//!
//! The backend owns credential verification, session issuance, and password
//! recovery; this client mirrors the last session it issued and fans every
//! lifecycle transition (signed in, token refreshed, signed out) out on a
//! broadcast channel.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::Session,
    error::{ProviderError, ProviderErrorCode},
    protocol::{
        AuthChange, ErrorBody, PasswordGrantRequest, RecoverRequest, RefreshGrantRequest,
        SessionPayload, SignUpProfile, SignUpRequest, SignUpResponseBody,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

const AUTH_CHANGE_CHANNEL_CAPACITY: usize = 64;

pub struct HttpIdentityClient {
    http: Client,
    base_url: String,
    api_key: String,
    cached: Mutex<Option<Session>>,
    changes: broadcast::Sender<AuthChange>,
}

impl HttpIdentityClient {
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base_url.as_ref())?;
        let (changes, _) = broadcast::channel(AUTH_CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            http: Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            cached: Mutex::new(None),
            changes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, ProviderError> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&PasswordGrantRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let payload: SessionPayload = decode_success(response).await?;
        let session = payload.into_session();
        self.store_session(session.clone(), AuthChange::SignedIn(session.clone()))
            .await;
        info!(user_id = %session.user_id, "identity: password sign-in succeeded");
        Ok(session)
    }

    /// `None` means the backend accepted the signup but defers session
    /// issuance until the email address is confirmed.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Option<Session>, ProviderError> {
        let response = self
            .http
            .post(self.endpoint("signup"))
            .header("apikey", &self.api_key)
            .json(&SignUpRequest {
                email: email.to_string(),
                password: password.to_string(),
                data: profile,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let body: SignUpResponseBody = decode_success(response).await?;
        match body.into_session() {
            Some(session) => {
                self.store_session(session.clone(), AuthChange::SignedIn(session.clone()))
                    .await;
                info!(user_id = %session.user_id, "identity: signup established a session");
                Ok(Some(session))
            }
            None => {
                debug!("identity: signup accepted, session deferred to email confirmation");
                Ok(None)
            }
        }
    }

    pub async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.endpoint("recover"))
            .query(&[("redirect_to", redirect_to)])
            .header("apikey", &self.api_key)
            .json(&RecoverRequest {
                email: email.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            info!("identity: password recovery dispatched");
            Ok(())
        } else {
            Err(decode_failure(response).await)
        }
    }

    /// Local session state clears no matter what the backend answers.
    pub async fn sign_out(&self) -> Result<(), ProviderError> {
        let token = {
            let cached = self.cached.lock().await;
            cached.as_ref().map(|session| session.access_token.clone())
        };

        let result = match token {
            Some(token) => {
                let response = self
                    .http
                    .post(self.endpoint("logout"))
                    .header("apikey", &self.api_key)
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(transport_error)?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(decode_failure(response).await)
                }
            }
            None => Ok(()),
        };

        self.clear_session().await;
        result
    }

    /// Last-known session, refreshed through the backend when the cached one
    /// has expired. Queried once at startup to resume an existing session.
    pub async fn get_session(&self) -> Option<Session> {
        let cached = { self.cached.lock().await.clone() };
        let session = cached?;
        if !session.is_expired(Utc::now()) {
            return Some(session);
        }

        let Some(refresh_token) = session.refresh_token else {
            warn!("identity: cached session expired with no refresh token");
            self.clear_session().await;
            return None;
        };

        match self.refresh(&refresh_token).await {
            Ok(refreshed) => Some(refreshed),
            Err(err) => {
                warn!(code = ?err.code, "identity: session refresh failed");
                self.clear_session().await;
                None
            }
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.api_key)
            .json(&RefreshGrantRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let payload: SessionPayload = decode_success(response).await?;
        let session = payload.into_session();
        self.store_session(session.clone(), AuthChange::TokenRefreshed(session.clone()))
            .await;
        info!(user_id = %session.user_id, "identity: session token refreshed");
        Ok(session)
    }

    async fn store_session(&self, session: Session, change: AuthChange) {
        {
            let mut cached = self.cached.lock().await;
            *cached = Some(session);
        }
        let _ = self.changes.send(change);
    }

    async fn clear_session(&self) {
        let had_session = {
            let mut cached = self.cached.lock().await;
            cached.take().is_some()
        };
        if had_session {
            let _ = self.changes.send(AuthChange::SignedOut);
        }
    }
}

async fn decode_success<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    if !response.status().is_success() {
        return Err(decode_failure(response).await);
    }
    response.json::<T>().await.map_err(|err| {
        ProviderError::new(
            ProviderErrorCode::Internal,
            format!("malformed identity response: {err}"),
        )
    })
}

async fn decode_failure(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.unwrap_or_default();
    classify_failure(status, &body)
}

fn classify_failure(status: StatusCode, body: &ErrorBody) -> ProviderError {
    let message = body
        .detail()
        .unwrap_or("identity request failed")
        .to_string();
    let lower = message.to_ascii_lowercase();

    let code = match body.error_code.as_deref() {
        Some("invalid_credentials") | Some("invalid_grant") => {
            ProviderErrorCode::InvalidCredentials
        }
        Some("user_already_exists") | Some("email_exists") => ProviderErrorCode::EmailExists,
        Some("validation_failed") => ProviderErrorCode::ValidationFailed,
        Some("over_request_rate_limit") => ProviderErrorCode::RateLimited,
        // Older backends report failures through the message alone.
        _ if lower.contains("invalid login credentials") => ProviderErrorCode::InvalidCredentials,
        _ if lower.contains("already registered") => ProviderErrorCode::EmailExists,
        _ if status == StatusCode::BAD_REQUEST
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::UNPROCESSABLE_ENTITY =>
        {
            ProviderErrorCode::ValidationFailed
        }
        _ if status == StatusCode::TOO_MANY_REQUESTS => ProviderErrorCode::RateLimited,
        _ if status.is_server_error() => ProviderErrorCode::Unavailable,
        _ => ProviderErrorCode::Internal,
    };

    ProviderError::new(code, message)
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::new(
        ProviderErrorCode::Unavailable,
        format!("identity backend unreachable: {err}"),
    )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
