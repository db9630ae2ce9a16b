use serde::{Deserialize, Serialize};
use tessera_types::{Level, UserClaims};

/// Administrator created on a node that has no users.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultAdmin {
    pub login: String,
    pub password: String,
}

impl Default for DefaultAdmin {
    fn default() -> Self {
        Self {
            login: "tessera".into(),
            password: "tessera".into(),
        }
    }
}

/// Access-control policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// With security off every operation is permitted.
    pub enabled: bool,
    /// When set, callers without claims are refused even for `Default` resources.
    pub mandatory_auth: bool,
    pub default_admin: DefaultAdmin,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mandatory_auth: false,
            default_admin: DefaultAdmin::default(),
        }
    }
}

impl SecurityConfig {
    /// Security switched off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether a caller with `claims` may touch a resource at `level`.
    pub fn has_permission(&self, claims: Option<&UserClaims>, level: Level) -> bool {
        if !self.enabled {
            return true;
        }
        match claims {
            Some(claims) => claims.level.permits(level),
            None => !self.mandatory_auth && level == Level::Default,
        }
    }

    /// Whether a caller may administer users.
    pub fn is_admin(&self, claims: Option<&UserClaims>) -> bool {
        self.has_permission(claims, Level::Secret)
    }
}
