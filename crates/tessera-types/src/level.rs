use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Ordered access-control tag.
///
/// Attached to values, objects and user claims. A caller may touch a
/// resource when its claim level is greater than or equal to the resource
/// level.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Level {
    #[default]
    Default = 0,
    Restricted = 1,
    Secret = 2,
}

impl Level {
    /// Numeric form used in log metadata.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Result<Self, TypeError> {
        match raw {
            0 => Ok(Self::Default),
            1 => Ok(Self::Restricted),
            2 => Ok(Self::Secret),
            other => Err(TypeError::InvalidLevel(other.to_string())),
        }
    }

    /// Returns `true` if a holder of `self` may access a resource at `resource`.
    pub fn permits(self, resource: Level) -> bool {
        self >= resource
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Restricted => write!(f, "Restricted"),
            Self::Secret => write!(f, "Secret"),
        }
    }
}

impl FromStr for Level {
    type Err = TypeError;

    /// Accepts either the level name (any case) or its numeric form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(raw) = s.parse::<u8>() {
            return Self::from_u8(raw);
        }
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "restricted" => Ok(Self::Restricted),
            "secret" => Ok(Self::Secret),
            _ => Err(TypeError::InvalidLevel(s.to_string())),
        }
    }
}
