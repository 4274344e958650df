//! Roles and the role → capability resolver
//!
//! The single source of role-gating truth for the platform. UI surfaces
//! and route handlers all ask this module instead of re-implementing
//! role comparisons inline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account privilege tiers, totally ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
#[derive(Default)]
pub enum Role {
    #[default]
    Visitor = 0,
    Student = 1,
    Teacher = 2,
    Admin = 3,
    Owner = 4,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Visitor,
        Role::Student,
        Role::Teacher,
        Role::Admin,
        Role::Owner,
    ];

    /// Parse a role from its wire/database form.
    /// Returns None for unknown names (which should be rejected).
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "visitor" => Some(Role::Visitor),
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Visitor => "visitor",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single permitted action derivable from a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// The non-owner administrative review panel. Granted to every role
    /// EXCEPT owner: owners get the separate OwnerControls surface
    /// instead of the shared panel.
    AccessAdminPanel,
    /// Create and upload videos, lessons, and images
    CreateContent,
    /// Owner-only surface: global settings and role management of all
    /// other accounts
    OwnerControls,
    /// Change another account's role (never one's own, see
    /// [`can_manage_role`])
    ManageUserRoles,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::AccessAdminPanel,
        Capability::CreateContent,
        Capability::OwnerControls,
        Capability::ManageUserRoles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AccessAdminPanel => "access_admin_panel",
            Capability::CreateContent => "create_content",
            Capability::OwnerControls => "owner_controls",
            Capability::ManageUserRoles => "manage_user_roles",
        }
    }

    /// Parse a capability from its wire/database form
    pub fn parse(s: &str) -> Option<Capability> {
        match s {
            "access_admin_panel" => Some(Capability::AccessAdminPanel),
            "create_content" => Some(Capability::CreateContent),
            "owner_controls" => Some(Capability::OwnerControls),
            "manage_user_roles" => Some(Capability::ManageUserRoles),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability set granted by a role. Pure and total over the five roles.
pub fn capabilities_of(role: Role) -> &'static [Capability] {
    match role {
        Role::Visitor => &[Capability::AccessAdminPanel],
        Role::Student => &[Capability::AccessAdminPanel],
        Role::Teacher => &[Capability::AccessAdminPanel, Capability::CreateContent],
        Role::Admin => &[
            Capability::AccessAdminPanel,
            Capability::CreateContent,
            Capability::ManageUserRoles,
        ],
        Role::Owner => &[
            Capability::CreateContent,
            Capability::ManageUserRoles,
            Capability::OwnerControls,
        ],
    }
}

/// Check whether a role grants a capability
pub fn role_grants(role: Role, capability: Capability) -> bool {
    capabilities_of(role).contains(&capability)
}

/// Resolve a role's capabilities with per-account overrides applied.
///
/// Overrides come from the `user_permissions` table, which is maintained
/// outside this service. A row wins over the role-derived default in
/// either direction; capabilities without a row keep the default.
pub fn resolve(role: Role, overrides: &[(Capability, bool)]) -> Vec<Capability> {
    Capability::ALL
        .iter()
        .copied()
        .filter(|cap| {
            overrides
                .iter()
                .find(|(c, _)| c == cap)
                .map(|(_, allowed)| *allowed)
                .unwrap_or_else(|| role_grants(role, *cap))
        })
        .collect()
}

/// Check whether an actor may change the role of the given target
/// account. Self-role-change is refused regardless of privilege, so an
/// admin cannot elevate themselves outside the purchase path.
pub fn can_manage_role(actor_role: Role, actor_id: &str, target_id: &str) -> bool {
    role_grants(actor_role, Capability::ManageUserRoles) && actor_id != target_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Teacher);
        assert!(Role::Teacher > Role::Student);
        assert!(Role::Student > Role::Visitor);
    }

    #[test]
    fn test_role_parse_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Owner"), None);
    }

    #[test]
    fn test_admin_panel_for_everyone_but_owner() {
        for role in Role::ALL {
            let expected = role != Role::Owner;
            assert_eq!(
                role_grants(role, Capability::AccessAdminPanel),
                expected,
                "admin panel visibility wrong for {}",
                role
            );
        }
    }

    #[test]
    fn test_create_content_from_teacher_up() {
        assert!(!role_grants(Role::Visitor, Capability::CreateContent));
        assert!(!role_grants(Role::Student, Capability::CreateContent));
        assert!(role_grants(Role::Teacher, Capability::CreateContent));
        assert!(role_grants(Role::Admin, Capability::CreateContent));
        assert!(role_grants(Role::Owner, Capability::CreateContent));
    }

    #[test]
    fn test_owner_controls_owner_only() {
        for role in Role::ALL {
            assert_eq!(
                role_grants(role, Capability::OwnerControls),
                role == Role::Owner
            );
        }
    }

    #[test]
    fn test_manage_roles_admin_and_owner() {
        assert!(!role_grants(Role::Teacher, Capability::ManageUserRoles));
        assert!(role_grants(Role::Admin, Capability::ManageUserRoles));
        assert!(role_grants(Role::Owner, Capability::ManageUserRoles));
    }

    #[test]
    fn test_self_role_change_refused() {
        assert!(can_manage_role(Role::Admin, "a", "b"));
        assert!(!can_manage_role(Role::Admin, "a", "a"));
        assert!(!can_manage_role(Role::Owner, "o", "o"));
        assert!(!can_manage_role(Role::Student, "s", "t"));
    }

    #[test]
    fn test_upgrades_keep_content_access() {
        // Content-access capabilities never shrink when a role upgrade
        // is purchased
        for (i, from) in Role::ALL.iter().enumerate() {
            for to in Role::ALL.iter().skip(i + 1) {
                if role_grants(*from, Capability::CreateContent) {
                    assert!(
                        role_grants(*to, Capability::CreateContent),
                        "{} -> {} lost CreateContent",
                        from,
                        to
                    );
                }
            }
        }
    }

    #[test]
    fn test_override_beats_default() {
        // Explicit deny removes a role-derived grant
        let caps = resolve(Role::Teacher, &[(Capability::CreateContent, false)]);
        assert!(!caps.contains(&Capability::CreateContent));
        assert!(caps.contains(&Capability::AccessAdminPanel));

        // Explicit allow adds a capability the role lacks
        let caps = resolve(Role::Student, &[(Capability::CreateContent, true)]);
        assert!(caps.contains(&Capability::CreateContent));

        // No overrides: role defaults
        let caps = resolve(Role::Admin, &[]);
        assert_eq!(caps.len(), capabilities_of(Role::Admin).len());
    }
}
