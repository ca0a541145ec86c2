//! Identity and authorization boundary.
//!
//! Narrow traits only — no JWT verification, no DB-backed role lookup.
//! Production wiring is an integration point left to the embedder
//! (`Arc<dyn Authenticator>`, `Arc<dyn Authorizer>` handed to the
//! Dispatcher); this module supplies the traits plus an in-memory test
//! double, in the same spirit as the teacher's `enterprise/security`
//! modules narrowing a large auth surface down to the trait the rest of
//! the system actually calls.

use crate::error::AppError;
use crate::model::{UserId, WorkspaceId};
use async_trait::async_trait;
use std::collections::HashMap;

/// A connection's claimed identity before it has been verified — in
/// practice a bearer token, session cookie, or similar; opaque here
/// since verification is out of scope.
#[derive(Debug, Clone)]
pub struct ConnectionCredential(pub String);

pub type DisplayName = String;

/// Total order over workspace roles: `Viewer < Editor < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `credential` and resolve it to a stable user id and the
    /// display name to present to other collaborators.
    async fn authenticate(
        &self,
        credential: &ConnectionCredential,
    ) -> Result<(UserId, DisplayName), AppError>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `user` holds at least `minimum` role in `workspace`.
    async fn authorize(&self, user: UserId, workspace: WorkspaceId, minimum: Role) -> Result<bool, AppError>;
}

/// Test/local-run double: every credential authenticates as a fixed
/// user id with a fixed display name. Never wired into a production
/// bootstrap.
pub struct AllowAllAuthenticator {
    user_id: UserId,
    display_name: DisplayName,
}

impl AllowAllAuthenticator {
    pub fn new(user_id: UserId, display_name: impl Into<DisplayName>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

#[async_trait]
impl Authenticator for AllowAllAuthenticator {
    async fn authenticate(
        &self,
        _credential: &ConnectionCredential,
    ) -> Result<(UserId, DisplayName), AppError> {
        Ok((self.user_id, self.display_name.clone()))
    }
}

/// Test/local-run double: a fixed map from `(user, workspace)` to role,
/// with an optional fallback role for unlisted pairs.
pub struct StaticAuthorizer {
    roles: HashMap<(UserId, WorkspaceId), Role>,
    default_role: Option<Role>,
}

impl StaticAuthorizer {
    pub fn new(default_role: Option<Role>) -> Self {
        Self {
            roles: HashMap::new(),
            default_role,
        }
    }

    pub fn grant(mut self, user: UserId, workspace: WorkspaceId, role: Role) -> Self {
        self.roles.insert((user, workspace), role);
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, user: UserId, workspace: WorkspaceId, minimum: Role) -> Result<bool, AppError> {
        let role = self.roles.get(&(user, workspace)).copied().or(self.default_role);
        Ok(role.map(|r| r >= minimum).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn role_ordering_is_viewer_lt_editor_lt_owner() {
        assert!(Role::Viewer < Role::Editor);
        assert!(Role::Editor < Role::Owner);
    }

    #[tokio::test]
    async fn static_authorizer_honours_granted_role() {
        let user = Uuid::new_v4();
        let ws = Uuid::new_v4();
        let authz = StaticAuthorizer::new(None).grant(user, ws, Role::Editor);

        assert!(authz.authorize(user, ws, Role::Viewer).await.unwrap());
        assert!(authz.authorize(user, ws, Role::Editor).await.unwrap());
        assert!(!authz.authorize(user, ws, Role::Owner).await.unwrap());
    }

    #[tokio::test]
    async fn static_authorizer_denies_unlisted_pair_without_default() {
        let authz = StaticAuthorizer::new(None);
        assert!(!authz
            .authorize(Uuid::new_v4(), Uuid::new_v4(), Role::Viewer)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn allow_all_authenticator_returns_fixed_identity() {
        let user = Uuid::new_v4();
        let authn = AllowAllAuthenticator::new(user, "Alice");
        let (resolved, name) = authn
            .authenticate(&ConnectionCredential("token".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved, user);
        assert_eq!(name, "Alice");
    }
}
