use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use nexus_auth::PermissionRecord;
use nexus_core::{PermissionId, RoleId, TenantId, UserId};

use super::{
    CredentialStore, NewRole, NewUser, RoleChange, RoleRecord, RoleUpdate, StoreError, StoreResult,
    UserRecord, UserUpdate,
};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserRecord>,
    roles: HashMap<RoleId, RoleRecord>,
    permissions: HashMap<PermissionId, PermissionRecord>,
    user_roles: BTreeSet<(UserId, RoleId)>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
}

impl State {
    fn holders(&self, role_id: RoleId) -> Vec<UserId> {
        self.user_roles
            .iter()
            .filter(|(_, r)| *r == role_id)
            .map(|(u, _)| *u)
            .collect()
    }

    fn check_permissions(&self, ids: &[PermissionId]) -> StoreResult<()> {
        match ids.iter().find(|id| !self.permissions.contains_key(id)) {
            Some(missing) => Err(StoreError::InvalidReference(format!("unknown permission {missing}"))),
            None => Ok(()),
        }
    }

    fn permissions_of_role(&self, role_id: RoleId) -> Vec<PermissionRecord> {
        self.role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| self.permissions.get(p).cloned())
            .collect()
    }
}

/// In-memory credential store for tests and local development.
///
/// A single lock guards all tables, which makes every mutation atomic.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    state: RwLock<State>,
    permission_queries: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times effective permissions were read; lets tests observe cache hits.
    pub fn permission_queries(&self) -> usize {
        self.permission_queries.load(Ordering::SeqCst)
    }

    /// Insert reference data. Permissions are not created through the API.
    pub fn insert_permission(&self, permission: PermissionRecord) {
        if let Ok(mut state) = self.state.write() {
            state.permissions.insert(permission.id, permission);
        }
    }

    /// Insert a fully formed user, e.g. a seeded administrator.
    pub fn insert_user(&self, user: UserRecord) {
        if let Ok(mut state) = self.state.write() {
            state.users.insert(user.id, user);
        }
    }

    /// Insert a fully formed role with its grants.
    pub fn insert_role(&self, role: RoleRecord, permission_ids: &[PermissionId]) {
        if let Ok(mut state) = self.state.write() {
            for permission_id in permission_ids {
                state.role_permissions.insert((role.id, *permission_id));
            }
            state.roles.insert(role.id, role);
        }
    }

    pub fn insert_assignment(&self, user_id: UserId, role_id: RoleId) {
        if let Ok(mut state) = self.state.write() {
            state.user_roles.insert((user_id, role_id));
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> StoreResult<T>) -> StoreResult<T> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("credential store lock poisoned".to_string()))?;
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> StoreResult<T>) -> StoreResult<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("credential store lock poisoned".to_string()))?;
        f(&mut state)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        self.read(|s| Ok(s.users.get(&user_id).cloned()))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        self.read(|s| {
            Ok(s.users
                .values()
                .filter(|u| u.email == email)
                .min_by_key(|u| u.created_at)
                .cloned())
        })
    }

    async fn list_users(&self, tenant_id: Option<TenantId>) -> StoreResult<Vec<UserRecord>> {
        self.read(|s| {
            let mut users: Vec<UserRecord> = s
                .users
                .values()
                .filter(|u| tenant_id.is_none_or(|t| u.tenant_id == t))
                .cloned()
                .collect();
            users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(users)
        })
    }

    async fn create_user(&self, user: NewUser, initial_role: Option<RoleId>) -> StoreResult<UserRecord> {
        self.write(|s| {
            if s.users
                .values()
                .any(|u| u.tenant_id == user.tenant_id && u.email == user.email)
            {
                return Err(StoreError::Conflict("User with this email already exists".to_string()));
            }
            if let Some(role_id) = initial_role {
                if !s.roles.contains_key(&role_id) {
                    return Err(StoreError::InvalidReference(format!("unknown role {role_id}")));
                }
            }

            let now = Utc::now();
            let record = UserRecord {
                id: UserId::new(),
                tenant_id: user.tenant_id,
                email: user.email,
                password_hash: user.password_hash,
                first_name: user.first_name,
                last_name: user.last_name,
                is_active: true,
                last_login_at: None,
                created_at: now,
                updated_at: now,
            };
            if let Some(role_id) = initial_role {
                s.user_roles.insert((record.id, role_id));
            }
            s.users.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn update_user(&self, user_id: UserId, update: UserUpdate) -> StoreResult<UserRecord> {
        self.write(|s| {
            let user = s.users.get_mut(&user_id).ok_or(StoreError::NotFound("user"))?;
            if let Some(first_name) = update.first_name {
                user.first_name = first_name;
            }
            if let Some(last_name) = update.last_name {
                user.last_name = last_name;
            }
            if let Some(is_active) = update.is_active {
                user.is_active = is_active;
            }
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<()> {
        self.write(|s| {
            s.users.remove(&user_id).ok_or(StoreError::NotFound("user"))?;
            s.user_roles.retain(|(u, _)| *u != user_id);
            Ok(())
        })
    }

    async fn record_login(&self, user_id: UserId) -> StoreResult<()> {
        self.write(|s| {
            if let Some(user) = s.users.get_mut(&user_id) {
                user.last_login_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    async fn roles_for_user(&self, user_id: UserId) -> StoreResult<Vec<RoleRecord>> {
        self.read(|s| {
            let mut roles: Vec<RoleRecord> = s
                .user_roles
                .iter()
                .filter(|(u, _)| *u == user_id)
                .filter_map(|(_, r)| s.roles.get(r).cloned())
                .collect();
            roles.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(roles)
        })
    }

    async fn permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<PermissionRecord>> {
        self.permission_queries.fetch_add(1, Ordering::SeqCst);
        self.read(|s| {
            Ok(s.user_roles
                .iter()
                .filter(|(u, _)| *u == user_id)
                .flat_map(|(_, r)| s.permissions_of_role(*r))
                .collect())
        })
    }

    async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<()> {
        self.write(|s| {
            if !s.users.contains_key(&user_id) {
                return Err(StoreError::InvalidReference(format!("unknown user {user_id}")));
            }
            if !s.roles.contains_key(&role_id) {
                return Err(StoreError::InvalidReference(format!("unknown role {role_id}")));
            }
            if !s.user_roles.insert((user_id, role_id)) {
                return Err(StoreError::Conflict("User already has this role".to_string()));
            }
            Ok(())
        })
    }

    async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> StoreResult<()> {
        self.write(|s| {
            if s.user_roles.remove(&(user_id, role_id)) {
                Ok(())
            } else {
                Err(StoreError::NotFound("role assignment"))
            }
        })
    }

    async fn list_roles(&self, tenant_id: TenantId) -> StoreResult<Vec<RoleRecord>> {
        self.read(|s| {
            let mut roles: Vec<RoleRecord> = s
                .roles
                .values()
                .filter(|r| r.tenant_id == tenant_id)
                .cloned()
                .collect();
            roles.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(roles)
        })
    }

    async fn find_role(&self, tenant_id: TenantId, role_id: RoleId) -> StoreResult<Option<RoleRecord>> {
        self.read(|s| {
            Ok(s.roles
                .get(&role_id)
                .filter(|r| r.tenant_id == tenant_id)
                .cloned())
        })
    }

    async fn find_role_by_name(&self, tenant_id: TenantId, name: &str) -> StoreResult<Option<RoleRecord>> {
        self.read(|s| {
            Ok(s.roles
                .values()
                .find(|r| r.tenant_id == tenant_id && r.name == name)
                .cloned())
        })
    }

    async fn role_permissions(&self, role_id: RoleId) -> StoreResult<Vec<PermissionRecord>> {
        self.read(|s| Ok(s.permissions_of_role(role_id)))
    }

    async fn create_role(&self, role: NewRole) -> StoreResult<RoleRecord> {
        self.write(|s| {
            if s.roles
                .values()
                .any(|r| r.tenant_id == role.tenant_id && r.name == role.name)
            {
                return Err(StoreError::Conflict("Role with this name already exists".to_string()));
            }
            s.check_permissions(&role.permission_ids)?;

            let now = Utc::now();
            let record = RoleRecord {
                id: RoleId::new(),
                tenant_id: role.tenant_id,
                name: role.name,
                description: role.description,
                created_at: now,
                updated_at: now,
            };
            for permission_id in &role.permission_ids {
                s.role_permissions.insert((record.id, *permission_id));
            }
            s.roles.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn update_role(
        &self,
        tenant_id: TenantId,
        role_id: RoleId,
        update: RoleUpdate,
    ) -> StoreResult<RoleChange> {
        self.write(|s| {
            match s.roles.get(&role_id) {
                Some(r) if r.tenant_id == tenant_id => {}
                _ => return Err(StoreError::NotFound("role")),
            }
            if let Some(name) = &update.name {
                if s.roles
                    .values()
                    .any(|r| r.id != role_id && r.tenant_id == tenant_id && &r.name == name)
                {
                    return Err(StoreError::Conflict("Role with this name already exists".to_string()));
                }
            }
            if let Some(ids) = &update.permission_ids {
                s.check_permissions(ids)?;
            }

            let holders = s.holders(role_id);
            if let Some(ids) = update.permission_ids {
                s.role_permissions.retain(|(r, _)| *r != role_id);
                for permission_id in ids {
                    s.role_permissions.insert((role_id, permission_id));
                }
            }

            let role = s.roles.get_mut(&role_id).ok_or(StoreError::NotFound("role"))?;
            if let Some(name) = update.name {
                role.name = name;
            }
            if let Some(description) = update.description {
                role.description = Some(description);
            }
            role.updated_at = Utc::now();

            Ok(RoleChange {
                role: role.clone(),
                holders,
            })
        })
    }

    async fn delete_role(&self, tenant_id: TenantId, role_id: RoleId) -> StoreResult<()> {
        self.write(|s| {
            match s.roles.get(&role_id) {
                Some(r) if r.tenant_id == tenant_id => {}
                _ => return Err(StoreError::NotFound("role")),
            }
            let holders = s.holders(role_id).len();
            if holders > 0 {
                return Err(StoreError::RoleInUse {
                    holders: holders as u64,
                });
            }
            s.role_permissions.retain(|(r, _)| *r != role_id);
            s.roles.remove(&role_id);
            Ok(())
        })
    }

    async fn list_permissions(&self) -> StoreResult<Vec<PermissionRecord>> {
        self.read(|s| {
            let mut all: Vec<PermissionRecord> = s.permissions.values().cloned().collect();
            all.sort_by(|a, b| {
                (&a.module, &a.action, &a.resource).cmp(&(&b.module, &b.action, &b.resource))
            });
            Ok(all)
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.read(|_| Ok(()))
    }
}
