//! Stable key newtypes for attribute owners.
//!
//! Any entities and memberships are keyed by UUIDs; schemas, classes,
//! any types and resources are keyed by their administrative names and
//! use plain `String`s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key of a user, group or any object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnyKey(pub Uuid);

/// Key of a membership between a groupable owner and a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipKey(pub Uuid);

impl AnyKey {
    pub fn generate() -> Self {
        AnyKey(Uuid::new_v4())
    }
}

impl MembershipKey {
    pub fn generate() -> Self {
        MembershipKey(Uuid::new_v4())
    }
}

impl fmt::Display for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MembershipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AnyKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(AnyKey)
    }
}

impl FromStr for MembershipKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(MembershipKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_key_display_parse_roundtrip() {
        let key = AnyKey::generate();
        let parsed: AnyKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(MembershipKey::generate(), MembershipKey::generate());
    }

    #[test]
    fn bad_key_rejected() {
        assert!("not-a-uuid".parse::<AnyKey>().is_err());
    }

    #[test]
    fn serde_is_transparent_string() {
        let key: AnyKey = "6f1a0c3e-2b44-4c1e-9a53-0c9f2a1d7e10".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"6f1a0c3e-2b44-4c1e-9a53-0c9f2a1d7e10\"");
    }
}
