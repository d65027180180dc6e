//! Role-based authorization
//!
//! Permissions come from three places: grants held directly by the
//! principal, grants attached to any of its roles, and the `admin`
//! permission which overrides every check.

pub mod rbac;

pub use rbac::{AuthorizationConfig, AuthorizationError, Authorizer, RbacAuthorizer};
