//! RBAC authorizer

use crate::models::{Permission, Principal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during authorization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("no principal provided")]
    NoPrincipal,

    #[error("Principal '{principal}' lacks '{permission}' on '{resource}'")]
    Denied {
        principal: String,
        resource: String,
        permission: Permission,
    },

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

impl AuthorizationError {
    /// Message safe to return to clients
    pub fn public_message(&self) -> &'static str {
        "forbidden"
    }
}

/// Decides whether a principal may exercise a permission on a resource
pub trait Authorizer: Send + Sync {
    /// Authorize a request; `None` is always denied
    fn authorize(
        &self,
        principal: Option<&Principal>,
        resource: &str,
        permission: Permission,
    ) -> Result<(), AuthorizationError>;
}

/// Authorization settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// When false any present principal is allowed
    pub enabled: bool,
    /// When false every authenticated principal also holds `read`
    pub default_deny: bool,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_deny: true,
        }
    }
}

/// Role-to-permission authorizer with runtime-extensible roles
#[derive(Debug)]
pub struct RbacAuthorizer {
    config: AuthorizationConfig,
    roles: RwLock<HashMap<String, BTreeSet<Permission>>>,
}

impl RbacAuthorizer {
    /// Create an authorizer with the built-in roles
    pub fn new(config: AuthorizationConfig) -> Self {
        let mut roles = HashMap::new();
        roles.insert("admin".to_string(), BTreeSet::from([Permission::Admin]));
        roles.insert(
            "user".to_string(),
            BTreeSet::from([Permission::Read, Permission::Write, Permission::Execute]),
        );
        roles.insert("readonly".to_string(), BTreeSet::from([Permission::Read]));

        Self {
            config,
            roles: RwLock::new(roles),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Define or replace a role
    pub fn add_role<I>(&self, role: impl Into<String>, permissions: I)
    where
        I: IntoIterator<Item = Permission>,
    {
        let role = role.into();
        let permissions: BTreeSet<Permission> = permissions.into_iter().collect();
        debug!(role = %role, ?permissions, "Role defined");
        self.roles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(role, permissions);
    }

    /// Add a permission to an existing role
    pub fn grant_permission(
        &self,
        role: &str,
        permission: Permission,
    ) -> Result<(), AuthorizationError> {
        let mut roles = self.roles.write().unwrap_or_else(|e| e.into_inner());
        let entry = roles
            .get_mut(role)
            .ok_or_else(|| AuthorizationError::UnknownRole(role.to_string()))?;
        entry.insert(permission);
        Ok(())
    }

    /// Permissions attached to a role
    pub fn role_permissions(&self, role: &str) -> Option<BTreeSet<Permission>> {
        self.roles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(role)
            .cloned()
    }

    /// Every permission a principal holds, directly or through roles
    pub fn effective_permissions(&self, principal: &Principal) -> BTreeSet<Permission> {
        let mut permissions = principal.permissions.clone();
        if !self.config.default_deny {
            permissions.insert(Permission::Read);
        }

        let roles = self.roles.read().unwrap_or_else(|e| e.into_inner());
        for role in &principal.roles {
            if let Some(granted) = roles.get(role) {
                permissions.extend(granted.iter().copied());
            }
        }
        permissions
    }

    fn has_permission(&self, principal: &Principal, permission: Permission) -> bool {
        let effective = self.effective_permissions(principal);
        effective.contains(&Permission::Admin) || effective.contains(&permission)
    }
}

impl Default for RbacAuthorizer {
    fn default() -> Self {
        Self::new(AuthorizationConfig::default())
    }
}

impl Authorizer for RbacAuthorizer {
    fn authorize(
        &self,
        principal: Option<&Principal>,
        resource: &str,
        permission: Permission,
    ) -> Result<(), AuthorizationError> {
        let Some(principal) = principal else {
            debug!(resource = %resource, %permission, "Authorization without principal");
            return Err(AuthorizationError::NoPrincipal);
        };

        if !self.config.enabled || self.has_permission(principal, permission) {
            return Ok(());
        }

        debug!(
            principal = %principal.id,
            resource = %resource,
            %permission,
            "Authorization denied"
        );
        Err(AuthorizationError::Denied {
            principal: principal.id.clone(),
            resource: resource.to_string(),
            permission,
        })
    }
}

#[cfg(test)]
#[path = "rbac_tests.rs"]
mod rbac_tests;
