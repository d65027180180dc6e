//! Request-scoped authentication context
//!
//! The context lives in a tokio task-local for the duration of one request
//! future. Nothing is stored globally; code outside a [`scope`] sees `None`.

use crate::models::{AuthContext, Principal};
use std::future::Future;

tokio::task_local! {
    static AUTH_CONTEXT: AuthContext;
}

/// Run `future` with `context` as the current authentication context
pub async fn scope<F>(context: AuthContext, future: F) -> F::Output
where
    F: Future,
{
    AUTH_CONTEXT.scope(context, future).await
}

/// The current authentication context, if inside a [`scope`]
pub fn current() -> Option<AuthContext> {
    AUTH_CONTEXT.try_with(Clone::clone).ok()
}

/// The current principal, if inside a [`scope`]
pub fn current_principal() -> Option<Principal> {
    AUTH_CONTEXT.try_with(|ctx| ctx.principal.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_exposes_context() {
        assert!(current().is_none());

        let ctx = AuthContext::new(Principal::new("alice")).with_session_id("s-1");
        let seen = scope(ctx, async {
            tokio::task::yield_now().await;
            current().map(|c| (c.principal.id, c.session_id))
        })
        .await;

        assert_eq!(seen, Some(("alice".to_string(), "s-1".to_string())));
        assert!(current_principal().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let a = tokio::spawn(scope(AuthContext::new(Principal::new("a")), async {
            tokio::task::yield_now().await;
            current_principal().map(|p| p.id)
        }));
        let b = tokio::spawn(scope(AuthContext::new(Principal::new("b")), async {
            tokio::task::yield_now().await;
            current_principal().map(|p| p.id)
        }));

        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
    }
}
