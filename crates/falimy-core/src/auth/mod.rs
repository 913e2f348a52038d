//! PocketBase auth client: password login, invite join and token refresh.

use std::fmt;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{MemberRole, ServerId};
use crate::util::{api_error_message, normalize_server_url, normalize_text_option, unix_millis_now};

/// Who is signed in, and which family they replicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: ServerId,
    pub family_id: ServerId,
    pub email: Option<String>,
    pub name: String,
    #[serde(default)]
    pub role: MemberRole,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub server_url: String,
    pub token: String,
    pub identity: AuthIdentity,
    /// When the token was issued or last refreshed (Unix ms)
    pub issued_at: i64,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("server_url", &self.server_url)
            .field("token", &"[REDACTED]")
            .field("identity", &self.identity)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Fields of `POST /api/falimy/join`
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub family_id: String,
    pub invite_code: String,
    pub email: String,
    pub password: String,
    pub name: String,
}

impl fmt::Debug for JoinRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("JoinRequest")
            .field("family_id", &self.family_id)
            .field("email", &self.email)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid invite code")]
    InvalidInviteCode,
    #[error("Family not found")]
    FamilyNotFound,
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("Too many attempts; try again later")]
    RateLimited,
    #[error("Account is not a member of any family")]
    NoFamily,
    #[error("Session expired; sign in again")]
    SessionExpired,
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

impl AuthError {
    /// Network trouble rather than a verdict from the server
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Durable storage of the signed-in session
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

#[derive(Clone)]
pub struct PocketBaseAuthClient<S: SessionPersistence> {
    base_url: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> PocketBaseAuthClient<S> {
    pub fn new(url: impl AsRef<str>, store: S) -> AuthResult<Self> {
        let base_url = normalize_server_url(url.as_ref()).ok_or(
            AuthError::InvalidConfiguration("Server URL must include http:// or https://"),
        )?;
        Ok(Self {
            base_url,
            client: Client::builder().build()?,
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Load the persisted session and refresh its token.
    ///
    /// When the server cannot be reached the stored session is kept so the
    /// app keeps working offline. A rejected token clears it.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored) = self.store.load_session()? else {
            return Ok(None);
        };
        if stored.server_url != self.base_url {
            return Ok(None);
        }

        match self.refresh(&stored).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) if error.is_transport() => {
                tracing::warn!("Could not refresh session while offline: {error}");
                Ok(Some(stored))
            }
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {error}");
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "identity": email.trim(),
            "password": password,
        });
        let request = self
            .client
            .post(format!(
                "{}/api/collections/users/auth-with-password",
                self.base_url
            ))
            .json(&payload);
        let response = self.send(request, login_error).await?;
        let session = response.into_session(&self.base_url)?;

        self.store.save_session(&session)?;
        tracing::info!("Signed in as {}", session.identity.user_id);
        Ok(session)
    }

    /// Create an account inside an existing family using its invite code.
    pub async fn join_family(&self, request: &JoinRequest) -> AuthResult<AuthSession> {
        validate_credentials(&request.email, &request.password)?;
        if normalize_text_option(Some(request.invite_code.clone())).is_none() {
            return Err(AuthError::InvalidRequest("Invite code is required".to_string()));
        }

        let builder = self
            .client
            .post(format!("{}/api/falimy/join", self.base_url))
            .json(request);
        let response = self.send(builder, join_error).await?;
        let session = response.into_session(&self.base_url)?;

        self.store.save_session(&session)?;
        tracing::info!(
            "Joined family {} as {}",
            session.identity.family_id,
            session.identity.user_id
        );
        Ok(session)
    }

    pub async fn refresh(&self, session: &AuthSession) -> AuthResult<AuthSession> {
        let request = self
            .client
            .post(format!(
                "{}/api/collections/users/auth-refresh",
                self.base_url
            ))
            .bearer_auth(&session.token);
        let response = self.send(request, refresh_error).await?;
        let refreshed = response.into_session(&self.base_url)?;

        self.store.save_session(&refreshed)?;
        Ok(refreshed)
    }

    /// Forget the session. PocketBase tokens are stateless, so nothing is
    /// sent to the server.
    pub fn logout(&self) -> AuthResult<()> {
        self.store.clear_session()
    }

    async fn send(
        &self,
        request: RequestBuilder,
        map_error: fn(StatusCode, String) -> AuthError,
    ) -> AuthResult<AuthResponse> {
        let response = request.header("Accept", "application/json").send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_error(status, api_error_message(status.as_u16(), &body)));
        }
        Ok(response.json::<AuthResponse>().await?)
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::InvalidRequest("Email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(AuthError::InvalidRequest("Password is required".to_string()));
    }
    Ok(())
}

fn login_error(status: StatusCode, message: String) -> AuthError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => AuthError::InvalidCredentials,
        StatusCode::TOO_MANY_REQUESTS => AuthError::RateLimited,
        _ => AuthError::Api(message),
    }
}

fn join_error(status: StatusCode, message: String) -> AuthError {
    match status {
        StatusCode::BAD_REQUEST => AuthError::InvalidRequest(message),
        StatusCode::UNAUTHORIZED => AuthError::InvalidInviteCode,
        StatusCode::NOT_FOUND => AuthError::FamilyNotFound,
        StatusCode::CONFLICT => AuthError::EmailTaken,
        StatusCode::TOO_MANY_REQUESTS => AuthError::RateLimited,
        _ => AuthError::Api(message),
    }
}

fn refresh_error(status: StatusCode, message: String) -> AuthError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            AuthError::SessionExpired
        }
        _ => AuthError::Api(message),
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: Option<String>,
    record: Option<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    family_id: Option<String>,
    #[serde(default)]
    role: Option<MemberRole>,
}

impl AuthResponse {
    fn into_session(self, server_url: &str) -> AuthResult<AuthSession> {
        let token = normalize_text_option(self.token).ok_or_else(|| {
            AuthError::Api("Auth response did not include a token".to_string())
        })?;
        let record = self.record.ok_or_else(|| {
            AuthError::Api("Auth response did not include the user record".to_string())
        })?;

        let user_id: ServerId = record
            .id
            .parse()
            .map_err(|_| AuthError::Api("Auth response has an invalid user id".to_string()))?;
        let family_id: ServerId = normalize_text_option(record.family_id)
            .ok_or(AuthError::NoFamily)?
            .parse()
            .map_err(|_| AuthError::NoFamily)?;

        Ok(AuthSession {
            server_url: server_url.to_string(),
            token,
            identity: AuthIdentity {
                user_id,
                family_id,
                email: normalize_text_option(record.email),
                name: normalize_text_option(record.name).unwrap_or_default(),
                role: record.role.unwrap_or_default(),
            },
            issued_at: unix_millis_now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemoryPersistence(Arc<Mutex<Option<AuthSession>>>);

    impl SessionPersistence for MemoryPersistence {
        fn load_session(&self) -> AuthResult<Option<AuthSession>> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
            *self.0.lock().unwrap() = Some(session.clone());
            Ok(())
        }

        fn clear_session(&self) -> AuthResult<()> {
            *self.0.lock().unwrap() = None;
            Ok(())
        }
    }

    fn response(body: serde_json::Value) -> AuthResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn response_becomes_session() {
        let session = response(serde_json::json!({
            "token": "jwt",
            "record": {
                "id": "user1",
                "email": "ada@example.com",
                "name": "Ada",
                "family_id": "fam1",
                "role": "admin",
                "verified": true
            }
        }))
        .into_session("https://pb.example.com")
        .unwrap();

        assert_eq!(session.identity.user_id.as_str(), "user1");
        assert_eq!(session.identity.family_id.as_str(), "fam1");
        assert_eq!(session.identity.role, MemberRole::Admin);
        assert_eq!(session.server_url, "https://pb.example.com");
    }

    #[test]
    fn user_without_family_is_rejected() {
        let error = response(serde_json::json!({
            "token": "jwt",
            "record": {"id": "user1", "family_id": ""}
        }))
        .into_session("https://pb.example.com")
        .unwrap_err();
        assert!(matches!(error, AuthError::NoFamily));
    }

    #[test]
    fn join_statuses_map_to_errors() {
        assert!(matches!(
            join_error(StatusCode::UNAUTHORIZED, String::new()),
            AuthError::InvalidInviteCode
        ));
        assert!(matches!(
            join_error(StatusCode::NOT_FOUND, String::new()),
            AuthError::FamilyNotFound
        ));
        assert!(matches!(
            join_error(StatusCode::CONFLICT, String::new()),
            AuthError::EmailTaken
        ));
        assert!(matches!(
            join_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            AuthError::RateLimited
        ));
        assert!(matches!(
            login_error(StatusCode::BAD_REQUEST, String::new()),
            AuthError::InvalidCredentials
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let session = AuthSession {
            server_url: "https://pb.example.com".to_string(),
            token: "secret-token".to_string(),
            identity: AuthIdentity {
                user_id: ServerId::from("user1"),
                family_id: ServerId::from("fam1"),
                email: None,
                name: "Ada".to_string(),
                role: MemberRole::Member,
            },
            issued_at: 1,
        };
        assert!(!format!("{session:?}").contains("secret-token"));

        let join = JoinRequest {
            family_id: "fam1".to_string(),
            invite_code: "secret-code".to_string(),
            email: "ada@example.com".to_string(),
            password: "secret-password".to_string(),
            name: "Ada".to_string(),
        };
        let rendered = format!("{join:?}");
        assert!(!rendered.contains("secret-code"));
        assert!(!rendered.contains("secret-password"));
    }

    #[tokio::test]
    async fn restore_ignores_session_for_other_server() {
        let store = MemoryPersistence::default();
        store
            .save_session(&AuthSession {
                server_url: "https://old.example.com".to_string(),
                token: "jwt".to_string(),
                identity: AuthIdentity {
                    user_id: ServerId::from("user1"),
                    family_id: ServerId::from("fam1"),
                    email: None,
                    name: String::new(),
                    role: MemberRole::Member,
                },
                issued_at: 1,
            })
            .unwrap();

        let client = PocketBaseAuthClient::new("https://pb.example.com", store).unwrap();
        assert!(client.restore_session().await.unwrap().is_none());
    }

    #[test]
    fn rejects_url_without_scheme() {
        assert!(matches!(
            PocketBaseAuthClient::new("pb.example.com", MemoryPersistence::default()),
            Err(AuthError::InvalidConfiguration(_))
        ));
    }
}
