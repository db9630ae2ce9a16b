use serde::{Deserialize, Serialize};

use crate::level::Level;

const PASSWORD_CONTEXT: &str = "tessera 2024-06 user password";

/// A user record.
///
/// Deletion is soft: an inactive user keeps its id and login so that the
/// change sequence stays meaningful to peers that sync users incrementally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
    /// Hex-encoded keyed BLAKE3 hash of login and password.
    pub password_hash: String,
    pub level: Level,
    pub active: bool,
    /// Value of the store's user change counter when this record last changed.
    pub change_seq: u64,
}

impl User {
    /// Build an active user from a plain password. The id is assigned by the store.
    pub fn new(login: impl Into<String>, password: &str, level: Level) -> Self {
        let login = login.into();
        let password_hash = Self::hash_password(&login, password);
        Self {
            id: 0,
            login,
            password_hash,
            level,
            active: true,
            change_seq: 0,
        }
    }

    pub fn hash_password(login: &str, password: &str) -> String {
        let mut hasher = blake3::Hasher::new_derive_key(PASSWORD_CONTEXT);
        hasher.update(login.as_bytes());
        hasher.update(&[0]);
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash == Self::hash_password(&self.login, password)
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = Self::hash_password(&self.login, password);
    }

    pub fn claims(&self) -> UserClaims {
        UserClaims {
            login: self.login.clone(),
            level: self.level,
        }
    }
}

/// Resolved identity of an authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    pub login: String,
    pub level: Level,
}

impl UserClaims {
    pub fn new(login: impl Into<String>, level: Level) -> Self {
        Self {
            login: login.into(),
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_deterministic() {
        let a = User::hash_password("alice", "hunter2");
        let b = User::hash_password("alice", "hunter2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_depends_on_login() {
        assert_ne!(
            User::hash_password("alice", "pw"),
            User::hash_password("bob", "pw")
        );
        // The separator keeps ("ab", "c") and ("a", "bc") apart.
        assert_ne!(
            User::hash_password("ab", "c"),
            User::hash_password("a", "bc")
        );
    }

    #[test]
    fn verify_and_change_password() {
        let mut user = User::new("carol", "old", Level::Restricted);
        assert!(user.active);
        assert!(user.verify_password("old"));
        user.set_password("new");
        assert!(!user.verify_password("old"));
        assert!(user.verify_password("new"));
    }

    #[test]
    fn claims_carry_level() {
        let user = User::new("dave", "pw", Level::Secret);
        assert_eq!(user.claims(), UserClaims::new("dave", Level::Secret));
    }
}
