//! Closed set of portal roles.
//!
//! Provider metadata carries roles as free-form strings. They are parsed into
//! [`Role`] exactly once, at the identity boundary. Unknown strings take the
//! explicit [`Role::from_claim`] path, which logs and degrades to the most
//! restrictive role instead of failing or silently guessing.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Administrator,
    Instructor,
    Learner,
    Guardian,
    FleetAdmin,
    Operator,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Self; 6] = [
        Self::Administrator,
        Self::Instructor,
        Self::Learner,
        Self::Guardian,
        Self::FleetAdmin,
        Self::Operator,
    ];

    /// Role granted when a claim cannot be understood.
    pub const MOST_RESTRICTIVE: Self = Self::Learner;

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Instructor => "instructor",
            Self::Learner => "learner",
            Self::Guardian => "guardian",
            Self::FleetAdmin => "fleet-admin",
            Self::Operator => "operator",
        }
    }

    /// Resolve a provider role claim, degrading unknown or missing values to
    /// [`Role::MOST_RESTRICTIVE`] with a warning.
    #[must_use]
    pub fn from_claim(claim: Option<&str>) -> Self {
        match claim.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.parse().unwrap_or_else(|err: UnknownRole| {
                warn!(role = %err.0, "unrecognized role claim, using most restrictive role");
                Self::MOST_RESTRICTIVE
            }),
            None => {
                warn!("missing role claim, using most restrictive role");
                Self::MOST_RESTRICTIVE
            }
        }
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Accepts the canonical names plus the legacy spellings stored by older
    /// portal screens (`admin`, `faculty`, `teacher`, `student`, `parent`,
    /// `transport_admin`, `staff`).
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "administrator" | "admin" | "super-admin" => Ok(Self::Administrator),
            "instructor" | "faculty" | "teacher" => Ok(Self::Instructor),
            "learner" | "student" => Ok(Self::Learner),
            "guardian" | "parent" => Ok(Self::Guardian),
            "fleet-admin" | "transport-admin" | "fleetadmin" => Ok(Self::FleetAdmin),
            "operator" | "staff" => Ok(Self::Operator),
            _ => Err(UnknownRole(raw.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
    }

    #[test]
    fn legacy_spellings_are_accepted() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Administrator));
        assert_eq!("Faculty".parse::<Role>(), Ok(Role::Instructor));
        assert_eq!("student".parse::<Role>(), Ok(Role::Learner));
        assert_eq!("parent".parse::<Role>(), Ok(Role::Guardian));
        assert_eq!("transport_admin".parse::<Role>(), Ok(Role::FleetAdmin));
    }

    #[test]
    fn unknown_claim_degrades_to_learner() {
        assert_eq!(Role::from_claim(Some("dean")), Role::Learner);
        assert_eq!(Role::from_claim(Some("  ")), Role::Learner);
        assert_eq!(Role::from_claim(None), Role::Learner);
        assert_eq!(Role::from_claim(Some("operator")), Role::Operator);
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&Role::FleetAdmin).unwrap_or_default();
        assert_eq!(json, "\"fleet-admin\"");
    }
}
