use crate::stored_object;

/// Scope a `Role` grants. `SuperAdmin` is global; the other two are scoped to
/// a single owner via `Role::owner_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleScope {
    Registered,
    OwnerAdmin,
    SuperAdmin,
}

/// A `(scope, owner_or_null)` tuple. `owner_id` is always `None` for `SuperAdmin`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Role {
    pub scope: RoleScope,
    pub owner_id: Option<String>,
}

impl Role {
    pub fn super_admin() -> Self {
        Self {
            scope: RoleScope::SuperAdmin,
            owner_id: None,
        }
    }

    pub fn owner_admin(owner_id: impl Into<String>) -> Self {
        Self {
            scope: RoleScope::OwnerAdmin,
            owner_id: Some(owner_id.into()),
        }
    }

    pub fn registered(owner_id: impl Into<String>) -> Self {
        Self {
            scope: RoleScope::Registered,
            owner_id: Some(owner_id.into()),
        }
    }
}

stored_object!(User, "user", {
    email: String,
    roles: Vec<Role>,
    /// Owner-group memberships, separate from roles (`user_owner_access`).
    owner_memberships: Vec<String>
});

impl User {
    pub fn new(id: String, email: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            email,
            roles: Vec::new(),
            owner_memberships: Vec::new(),
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles.iter().any(|r| r.scope == RoleScope::SuperAdmin)
    }

    pub fn is_owner_admin_of(&self, owner_id: &str) -> bool {
        self.roles
            .iter()
            .any(|r| r.scope == RoleScope::OwnerAdmin && r.owner_id.as_deref() == Some(owner_id))
    }

    pub fn has_owner_membership(&self, owner_id: &str) -> bool {
        self.owner_memberships.iter().any(|o| o == owner_id)
            || self
                .roles
                .iter()
                .any(|r| r.owner_id.as_deref() == Some(owner_id))
    }
}
