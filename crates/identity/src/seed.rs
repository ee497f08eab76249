//! Development seed data for the in-memory credential store.
//!
//! Mirrors the database seed: one tenant, three roles and an administrator
//! (`admin@nexus.lk` / `admin123`).

use chrono::Utc;
use uuid::Uuid;

use nexus_auth::{PasswordError, PasswordHasher, PermissionRecord};
use nexus_core::{PermissionId, RoleId, TenantId, UserId};
use nexus_infra::{InMemoryCredentialStore, RoleRecord, UserRecord};

pub const DEFAULT_TENANT_ID: TenantId =
    TenantId::from_uuid(Uuid::from_u128(0xb0a8c6b0_5c3e_4d7f_8b9a_1e2f3a4b5c6d));
pub const ADMIN_USER_ID: UserId =
    UserId::from_uuid(Uuid::from_u128(0xd1e2f3a4_b5c6_7890_defa_234567890123));
pub const ADMIN_EMAIL: &str = "admin@nexus.lk";
pub const ADMIN_PASSWORD: &str = "admin123";

const ADMIN_ROLE_ID: u128 = 0xa1b2c3d4_e5f6_7890_abcd_ef1234567890;
const MANAGER_ROLE_ID: u128 = 0xb1c2d3e4_f5a6_7890_bcde_f12345678901;
const EMPLOYEE_ROLE_ID: u128 = 0xc1d2e3f4_a5b6_7890_cdef_123456789012;

/// `(id, module, action, resource, description)`
const PERMISSIONS: &[(u128, &str, &str, &str, &str)] = &[
    (0xe1f2a3b4_c5d6_7890_abcd_1234567890ef, "identity", "read", "users", "Read user list/details"),
    (0xf2a3b4c5_d6e7_8901_abcd_2345678901ef, "identity", "create", "users", "Create new users"),
    (0xa3b4c5d6_e7f8_9012_abcd_3456789012ef, "identity", "update", "users", "Update existing users"),
    (0xb4c5d6e7_f8a9_0123_abcd_4567890123ef, "identity", "delete", "users", "Delete users"),
    (0xc5d6e7f8_a9b0_1234_abcd_5678901234ef, "identity", "manage", "roles", "Manage roles and permissions"),
    (0xd6e7f8a9_b0c1_2345_abcd_6789012345ef, "tenant", "read", "tenants", "Read tenants"),
    (0xe7f8a9b0_c1d2_3456_abcd_7890123456ef, "payroll", "read", "payroll", "Read payroll data"),
];

fn permission(index: usize) -> PermissionId {
    PermissionId::from_uuid(Uuid::from_u128(PERMISSIONS[index].0))
}

fn role(id: u128, name: &str, description: &str) -> RoleRecord {
    let now = Utc::now();
    RoleRecord {
        id: RoleId::from_uuid(Uuid::from_u128(id)),
        tenant_id: DEFAULT_TENANT_ID,
        name: name.to_string(),
        description: Some(description.to_string()),
        created_at: now,
        updated_at: now,
    }
}

/// Populate `store` with the development fixtures.
pub fn seed_development(store: &InMemoryCredentialStore, hasher: &PasswordHasher) -> Result<(), PasswordError> {
    for (id, module, action, resource, description) in PERMISSIONS {
        store.insert_permission(PermissionRecord {
            id: PermissionId::from_uuid(Uuid::from_u128(*id)),
            name: format!("{module}_{action}_{resource}"),
            description: Some((*description).to_string()),
            module: (*module).to_string(),
            action: (*action).to_string(),
            resource: (*resource).to_string(),
        });
    }

    let all: Vec<PermissionId> = (0..PERMISSIONS.len()).map(permission).collect();
    let admin = role(ADMIN_ROLE_ID, "admin", "System Administrator with full access");
    let admin_role_id = admin.id;
    store.insert_role(admin, &all);
    store.insert_role(
        role(MANAGER_ROLE_ID, "manager", "Manager with limited administrative access"),
        &[permission(0), permission(2), permission(5)],
    );
    store.insert_role(
        role(EMPLOYEE_ROLE_ID, "employee", "Regular employee with basic access"),
        &[permission(0)],
    );

    let now = Utc::now();
    store.insert_user(UserRecord {
        id: ADMIN_USER_ID,
        tenant_id: DEFAULT_TENANT_ID,
        email: ADMIN_EMAIL.to_string(),
        password_hash: hasher.hash(ADMIN_PASSWORD)?,
        first_name: "Admin".to_string(),
        last_name: "User".to_string(),
        is_active: true,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    });
    store.insert_assignment(ADMIN_USER_ID, admin_role_id);

    Ok(())
}
