//! Role name sanitization for externally supplied role lists

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Roles accepted without pattern checks
pub const BUILTIN_ROLES: &[&str] = &["admin", "user", "readonly", "viewer", "editor", "operator"];

/// Role assigned when nothing valid remains
pub const DEFAULT_ROLE: &str = "user";

static ROLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("valid role regex"));

/// Whether a normalized role name is acceptable
pub fn is_valid_role(role: &str) -> bool {
    BUILTIN_ROLES.contains(&role) || ROLE_PATTERN.is_match(role)
}

/// Normalize, filter and de-duplicate roles.
///
/// Roles are lower-cased and trimmed; invalid entries are dropped and the
/// first occurrence of a duplicate wins. An empty result becomes
/// `["user"]`.
pub fn sanitize_roles<I, S>(roles: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sanitized: Vec<String> = Vec::new();

    for raw in roles {
        let role = raw.as_ref().trim().to_lowercase();
        if role.is_empty() {
            continue;
        }
        if !is_valid_role(&role) {
            debug!(len = role.len(), "Dropping invalid role");
            continue;
        }
        if !sanitized.contains(&role) {
            sanitized.push(role);
        }
    }

    if sanitized.is_empty() {
        sanitized.push(DEFAULT_ROLE.to_string());
    }
    sanitized
}

/// Split a comma-separated header value and sanitize it
pub fn parse_role_list(value: &str) -> Vec<String> {
    sanitize_roles(value.split(','))
}
