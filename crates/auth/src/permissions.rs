use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use nexus_core::PermissionId;

/// Canonical permission string, `module:action:resource`.
///
/// Tokens and authorization checks only ever deal with this rendered form;
/// the structured [`PermissionRecord`] is what the credential store holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn from_parts(module: &str, action: &str, resource: &str) -> Self {
        Self(Cow::Owned(format!("{module}:{action}:{resource}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(module, action, resource)`, if the string is well formed.
    pub fn parts(&self) -> Option<(&str, &str, &str)> {
        let mut it = self.0.splitn(3, ':');
        match (it.next(), it.next(), it.next()) {
            (Some(m), Some(a), Some(r)) if !m.is_empty() && !a.is_empty() && !r.is_empty() => {
                Some((m, a, r))
            }
            _ => None,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// A permission as persisted: global reference data, never tenant-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub id: PermissionId,
    pub name: String,
    pub description: Option<String>,
    pub module: String,
    pub action: String,
    pub resource: String,
}

impl PermissionRecord {
    /// Render the canonical string form.
    pub fn render(&self) -> Permission {
        Permission::from_parts(&self.module, &self.action, &self.resource)
    }
}
