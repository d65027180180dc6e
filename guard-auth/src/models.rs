//! Authentication models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Coarse-grained permission; `Admin` implies every other permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl Permission {
    /// All permissions
    pub const ALL: [Permission; 4] = [
        Permission::Read,
        Permission::Write,
        Permission::Execute,
        Permission::Admin,
    ];

    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "execute" => Ok(Self::Execute),
            "admin" => Ok(Self::Admin),
            other => Err(format!("Unknown permission: {other}")),
        }
    }
}

/// Authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier (user name or e-mail)
    pub id: String,
    /// Display name
    pub name: String,
    /// Ordered, de-duplicated roles
    pub roles: Vec<String>,
    /// Directly granted permissions
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    /// Free-form attributes, e.g. `auth_mode` or `issuer`
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Principal {
    /// Create a principal with no roles or permissions
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            roles: Vec::new(),
            permissions: BTreeSet::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append roles, skipping ones already present
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for role in roles {
            let role = role.into();
            if !self.roles.contains(&role) {
                self.roles.push(role);
            }
        }
        self
    }

    /// Grant a permission directly
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the principal holds `role`
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the permission is granted directly (not via roles)
    pub fn has_direct_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
    }
}

/// Client details captured from the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Remote address
    pub ip_address: Option<String>,
    /// User agent string
    pub user_agent: Option<String>,
}

/// Authenticated request context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Authenticated principal
    pub principal: Principal,
    /// Session identifier
    pub session_id: String,
    /// Client details
    pub client: ClientInfo,
    /// When the request was authenticated
    pub timestamp: DateTime<Utc>,
}

impl AuthContext {
    /// Create a context with a fresh session id
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            session_id: uuid::Uuid::new_v4().to_string(),
            client: ClientInfo::default(),
            timestamp: Utc::now(),
        }
    }

    /// Set the session identifier
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the client details
    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }
}
