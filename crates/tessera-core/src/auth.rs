use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tessera_store::Store;
use tessera_types::UserClaims;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Session issuing and validation.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Check a login and password and open a session.
    async fn auth_by_password(&self, login: &str, password: &str) -> CoreResult<String>;
    /// Resolve a session token to the caller's claims.
    async fn auth_by_token(&self, token: &str) -> CoreResult<UserClaims>;
}

/// In-process sessions backed by the node's user table.
///
/// Tokens are random UUIDv7 strings. A token stays valid while its user is
/// active; the claims reflect the user's current level, not the level at
/// login time.
pub struct SessionAuth {
    store: Arc<Store>,
    sessions: RwLock<HashMap<String, String>>,
}

impl SessionAuth {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Close a session. Returns whether the token was known.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .remove(token)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("sessions lock poisoned").len()
    }
}

#[async_trait]
impl AuthProvider for SessionAuth {
    async fn auth_by_password(&self, login: &str, password: &str) -> CoreResult<String> {
        let user = self
            .store
            .user_by_name(login)
            .map_err(|_| CoreError::InvalidCredentials)?;
        if !user.verify_password(password) {
            return Err(CoreError::InvalidCredentials);
        }
        let token = Uuid::now_v7().to_string();
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .insert(token.clone(), user.login);
        debug!(login, "session opened");
        Ok(token)
    }

    async fn auth_by_token(&self, token: &str) -> CoreResult<UserClaims> {
        let login = self
            .sessions
            .read()
            .expect("sessions lock poisoned")
            .get(token)
            .cloned()
            .ok_or(CoreError::InvalidToken)?;
        match self.store.user_by_name(&login) {
            Ok(user) => Ok(user.claims()),
            Err(_) => {
                self.revoke(token);
                Err(CoreError::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{Level, User};

    fn auth_with_user() -> (SessionAuth, Arc<Store>) {
        let store = Arc::new(Store::new());
        store.create_user(User::new("alice", "pw", Level::Restricted)).unwrap();
        (SessionAuth::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn password_then_token() {
        let (auth, _) = auth_with_user();
        let token = auth.auth_by_password("alice", "pw").await.unwrap();
        let claims = auth.auth_by_token(&token).await.unwrap();
        assert_eq!(claims, UserClaims::new("alice", Level::Restricted));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_rejected() {
        let (auth, _) = auth_with_user();
        assert!(matches!(
            auth.auth_by_password("alice", "nope").await,
            Err(CoreError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.auth_by_password("bob", "pw").await,
            Err(CoreError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.auth_by_token("made-up").await,
            Err(CoreError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn deleting_user_invalidates_sessions() {
        let (auth, store) = auth_with_user();
        let token = auth.auth_by_password("alice", "pw").await.unwrap();
        store.delete_user("alice").unwrap();
        assert!(auth.auth_by_token(&token).await.is_err());
        assert_eq!(auth.session_count(), 0);
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let (auth, _) = auth_with_user();
        let a = auth.auth_by_password("alice", "pw").await.unwrap();
        let b = auth.auth_by_password("alice", "pw").await.unwrap();
        assert_ne!(a, b);
        assert!(auth.revoke(&a));
        assert!(!auth.revoke(&a));
    }
}
