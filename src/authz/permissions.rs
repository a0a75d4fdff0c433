//! Role to capability mapping.
//!
//! Each role maps to a frozen [`PermissionSet`] built once on first use. The
//! sets are total: every [`Permission`] appears in every set, so a lookup
//! never has to decide what a missing key means.

use super::role::Role;
use once_cell::sync::Lazy;
use serde::{Serialize, Serializer, ser::SerializeMap};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown permission: {0}")]
pub struct UnknownPermission(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    ViewDashboard,
    ManageUsers,
    ManageFees,
    ViewFees,
    ManageHostel,
    ManageLibrary,
    ManageTransport,
    ViewTransport,
    ManageCourses,
    MarkAttendance,
    ViewAttendance,
    ManageExams,
    ViewResults,
    ViewReports,
    ManageQuality,
    ManageOnboarding,
    SubmitAssignments,
    ViewChildRecords,
}

impl Permission {
    pub const ALL: [Self; 18] = [
        Self::ViewDashboard,
        Self::ManageUsers,
        Self::ManageFees,
        Self::ViewFees,
        Self::ManageHostel,
        Self::ManageLibrary,
        Self::ManageTransport,
        Self::ViewTransport,
        Self::ManageCourses,
        Self::MarkAttendance,
        Self::ViewAttendance,
        Self::ManageExams,
        Self::ViewResults,
        Self::ViewReports,
        Self::ManageQuality,
        Self::ManageOnboarding,
        Self::SubmitAssignments,
        Self::ViewChildRecords,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ViewDashboard => "view_dashboard",
            Self::ManageUsers => "manage_users",
            Self::ManageFees => "manage_fees",
            Self::ViewFees => "view_fees",
            Self::ManageHostel => "manage_hostel",
            Self::ManageLibrary => "manage_library",
            Self::ManageTransport => "manage_transport",
            Self::ViewTransport => "view_transport",
            Self::ManageCourses => "manage_courses",
            Self::MarkAttendance => "mark_attendance",
            Self::ViewAttendance => "view_attendance",
            Self::ManageExams => "manage_exams",
            Self::ViewResults => "view_results",
            Self::ViewReports => "view_reports",
            Self::ManageQuality => "manage_quality",
            Self::ManageOnboarding => "manage_onboarding",
            Self::SubmitAssignments => "submit_assignments",
            Self::ViewChildRecords => "view_child_records",
        }
    }
}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|permission| permission.as_str() == name)
            .ok_or_else(|| UnknownPermission(name.to_string()))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean capability map derived from a role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionSet {
    grants: BTreeMap<Permission, bool>,
}

impl PermissionSet {
    fn granting(granted: &[Permission]) -> Self {
        let grants = Permission::ALL
            .into_iter()
            .map(|permission| (permission, granted.contains(&permission)))
            .collect();
        Self { grants }
    }

    #[must_use]
    pub fn allows(&self, permission: Permission) -> bool {
        self.grants.get(&permission).copied().unwrap_or(false)
    }

    /// Lookup by wire name; unknown names are never granted.
    #[must_use]
    pub fn allows_named(&self, name: &str) -> bool {
        match name.parse::<Permission>() {
            Ok(permission) => self.allows(permission),
            Err(err) => {
                debug!("{err}");
                false
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Permission, bool)> + '_ {
        self.grants.iter().map(|(permission, granted)| (*permission, *granted))
    }

    pub fn granted(&self) -> impl Iterator<Item = Permission> + '_ {
        self.iter()
            .filter_map(|(permission, granted)| granted.then_some(permission))
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.grants.len()))?;
        for (permission, granted) in &self.grants {
            map.serialize_entry(permission.as_str(), granted)?;
        }
        map.end()
    }
}

static ADMINISTRATOR: Lazy<PermissionSet> = Lazy::new(|| PermissionSet::granting(&Permission::ALL));

static INSTRUCTOR: Lazy<PermissionSet> = Lazy::new(|| {
    PermissionSet::granting(&[
        Permission::ViewDashboard,
        Permission::ManageCourses,
        Permission::MarkAttendance,
        Permission::ViewAttendance,
        Permission::ManageExams,
        Permission::ViewResults,
        Permission::ViewReports,
    ])
});

static LEARNER: Lazy<PermissionSet> = Lazy::new(|| {
    PermissionSet::granting(&[
        Permission::ViewDashboard,
        Permission::ViewFees,
        Permission::ViewAttendance,
        Permission::ViewResults,
        Permission::SubmitAssignments,
        Permission::ViewTransport,
    ])
});

static GUARDIAN: Lazy<PermissionSet> = Lazy::new(|| {
    PermissionSet::granting(&[
        Permission::ViewDashboard,
        Permission::ViewFees,
        Permission::ViewAttendance,
        Permission::ViewResults,
        Permission::ViewChildRecords,
        Permission::ViewTransport,
    ])
});

static FLEET_ADMIN: Lazy<PermissionSet> = Lazy::new(|| {
    PermissionSet::granting(&[
        Permission::ViewDashboard,
        Permission::ManageTransport,
        Permission::ViewTransport,
        Permission::ViewReports,
    ])
});

static OPERATOR: Lazy<PermissionSet> = Lazy::new(|| {
    PermissionSet::granting(&[
        Permission::ViewDashboard,
        Permission::ManageFees,
        Permission::ViewFees,
        Permission::ManageHostel,
        Permission::ManageLibrary,
        Permission::ManageOnboarding,
        Permission::ViewAttendance,
        Permission::ViewReports,
    ])
});

/// Pure lookup from role to its frozen permission set.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissionRegistry;

impl PermissionRegistry {
    #[must_use]
    pub fn permissions(role: Role) -> &'static PermissionSet {
        match role {
            Role::Administrator => &*ADMINISTRATOR,
            Role::Instructor => &*INSTRUCTOR,
            Role::Learner => &*LEARNER,
            Role::Guardian => &*GUARDIAN,
            Role::FleetAdmin => &*FLEET_ADMIN,
            Role::Operator => &*OPERATOR,
        }
    }

    /// Permission set for a raw provider claim; unknown claims get the most
    /// restrictive set (logged by [`Role::from_claim`]).
    #[must_use]
    pub fn permissions_for_claim(claim: Option<&str>) -> &'static PermissionSet {
        Self::permissions(Role::from_claim(claim))
    }
}
