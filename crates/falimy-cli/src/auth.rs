//! CLI PocketBase session helpers with secure keychain persistence.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use falimy_core::auth::{AuthResult, JoinRequest, PocketBaseAuthClient, SessionPersistence};
pub use falimy_core::auth::{AuthError, AuthSession};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "falimy-cli";

#[derive(Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("pocketbase_session:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> AuthResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }
}

impl SessionPersistence for SessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let store = Self::test_store();
        let guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        if let Some(raw) = guard.get(&self.username) {
            Ok(Some(serde_json::from_str(raw)?))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        Ok(())
    }

    #[cfg(test)]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_session(&self) -> AuthResult<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_session(&self) -> AuthResult<()> {
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

#[derive(Clone)]
pub struct PocketBaseAuthService {
    inner: PocketBaseAuthClient<SessionStore>,
}

impl PocketBaseAuthService {
    pub fn new(profile_name: &str, server_url: &str) -> AuthResult<Self> {
        Ok(Self {
            inner: PocketBaseAuthClient::new(server_url, SessionStore::new(profile_name))?,
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        self.inner.login(email, password).await
    }

    pub async fn join_family(&self, request: &JoinRequest) -> AuthResult<AuthSession> {
        self.inner.join_family(request).await
    }

    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        self.inner.restore_session().await
    }
}

pub fn load_stored_session(profile_name: &str) -> AuthResult<Option<AuthSession>> {
    SessionStore::new(profile_name).load_session()
}

pub fn clear_stored_session(profile_name: &str) -> AuthResult<()> {
    SessionStore::new(profile_name).clear_session()
}

#[cfg(test)]
mod tests {
    use falimy_core::auth::AuthIdentity;
    use falimy_core::models::MemberRole;
    use falimy_core::ServerId;

    use super::*;

    fn session() -> AuthSession {
        AuthSession {
            server_url: "https://pb.example.com".to_string(),
            token: "secret-token".to_string(),
            identity: AuthIdentity {
                user_id: ServerId::from("user1"),
                family_id: ServerId::from("fam1"),
                email: Some("ada@example.com".to_string()),
                name: "Ada".to_string(),
                role: MemberRole::Admin,
            },
            issued_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn stored_session_is_scoped_to_profile() {
        let store = SessionStore::new("auth-test-scoped");
        store.save_session(&session()).unwrap();

        assert_eq!(
            load_stored_session("auth-test-scoped").unwrap(),
            Some(session())
        );
        assert_eq!(load_stored_session("auth-test-other").unwrap(), None);

        clear_stored_session("auth-test-scoped").unwrap();
        assert_eq!(load_stored_session("auth-test-scoped").unwrap(), None);
    }

    #[test]
    fn session_debug_redacts_token() {
        let rendered = format!("{:?}", session());
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
