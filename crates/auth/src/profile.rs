//! Effective roles and permissions of one user.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Permission, PermissionRecord, Role};

/// Computed `{roles, permissionObjects, permissionStrings}` snapshot for one user.
///
/// Derived from the credential store, cached, and embedded in tokens. Never
/// authoritative: `permission_strings[i]` is always `permission_objects[i].render()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessProfile {
    pub roles: Vec<Role>,
    pub permission_objects: Vec<PermissionRecord>,
    pub permission_strings: Vec<Permission>,
}

impl AccessProfile {
    /// Build a profile from raw credential-store rows.
    ///
    /// Roles are deduplicated by name and permissions by id, keeping the
    /// first occurrence so the output order follows the input order.
    pub fn from_rows<R, P>(role_names: R, permission_rows: P) -> Self
    where
        R: IntoIterator<Item = String>,
        P: IntoIterator<Item = PermissionRecord>,
    {
        let mut seen_roles = HashSet::new();
        let roles: Vec<Role> = role_names
            .into_iter()
            .filter(|name| seen_roles.insert(name.clone()))
            .map(Role::new)
            .collect();

        let mut seen_ids = HashSet::new();
        let permission_objects: Vec<PermissionRecord> = permission_rows
            .into_iter()
            .filter(|p| seen_ids.insert(p.id))
            .collect();

        let permission_strings = permission_objects.iter().map(PermissionRecord::render).collect();

        Self {
            roles,
            permission_objects,
            permission_strings,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(Role::is_admin)
    }
}
