//! Build and project identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifier of a build record. Builds are keyed by a numeric id assigned
/// by the store, so ascending ids follow creation order.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
pub struct BuildId(i64);

impl BuildId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for BuildId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<BuildId> for i64 {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

impl std::str::FromStr for BuildId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Identifier of the project a build belongs to.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
pub struct ProjectId(i64);

impl ProjectId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ProjectId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ProjectId> for i64 {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ProjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_id_parse_and_display() {
        let id: BuildId = " 42 ".parse().unwrap();
        assert_eq!(id, BuildId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_build_id_rejects_garbage() {
        assert!("abc".parse::<BuildId>().is_err());
    }

    #[test]
    fn test_ids_order_by_value() {
        assert!(BuildId::new(1) < BuildId::new(2));
        assert!(ProjectId::new(7) > ProjectId::new(3));
    }
}
