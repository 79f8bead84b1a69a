//! Caller identity and the sources a caller may read

use crate::error::{Result, SourcegateError};
use crate::metadata::{MetadataStore, UserRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Role that may read every configured source of its tenant
pub const ADMIN_ROLE: &str = "admin";

/// Ordered set of source keys
pub type SourceSet = BTreeSet<String>;

/// Authorization context of a request, resolved upstream
///
/// `allowed_sources` is authoritative: retrieval never widens it, and every
/// hit it returns carries a source key from this set and the caller's tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
    pub allowed_sources: SourceSet,
}

impl AuthContext {
    pub fn new<I, S>(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
        allowed_sources: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            role: role.into(),
            allowed_sources: allowed_sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    pub fn allows(&self, tenant_id: &str, source_key: &str) -> bool {
        self.tenant_id == tenant_id && self.allowed_sources.contains(source_key)
    }
}

/// Resolves a user id into an authorization context
pub trait AuthResolver: Send + Sync {
    fn resolve(&self, user_id: &str) -> Result<AuthContext>;
}

/// Resolver backed by the user table of a metadata store
pub struct UserDirectory {
    metadata: Arc<dyn MetadataStore>,
    all_sources: SourceSet,
}

impl UserDirectory {
    /// `all_sources` is what an admin may read
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        all_sources: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            metadata,
            all_sources: all_sources.into_iter().collect(),
        }
    }

    fn context_for(&self, user: UserRecord) -> AuthContext {
        let allowed_sources = if user.role == ADMIN_ROLE {
            self.all_sources.clone()
        } else {
            user.allowed_sources.into_iter().collect()
        };

        AuthContext {
            tenant_id: user.tenant_id,
            user_id: user.id,
            role: user.role,
            allowed_sources,
        }
    }
}

impl AuthResolver for UserDirectory {
    fn resolve(&self, user_id: &str) -> Result<AuthContext> {
        let user = self
            .metadata
            .get_user(user_id)?
            .ok_or_else(|| SourcegateError::UserNotFound {
                id: user_id.to_string(),
            })?;

        let context = self.context_for(user);
        tracing::debug!(
            "Resolved user {} in tenant {} with {} sources",
            context.user_id,
            context.tenant_id,
            context.allowed_sources.len()
        );
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{NewUser, SqliteMetadataStore};
    use tempfile::TempDir;

    fn directory(temp_dir: &TempDir) -> (Arc<SqliteMetadataStore>, UserDirectory) {
        let store =
            Arc::new(SqliteMetadataStore::open(&temp_dir.path().join("meta.sqlite")).unwrap());
        let all = ["public", "finance", "hr"].iter().map(|s| s.to_string());
        let directory = UserDirectory::new(store.clone(), all);
        (store, directory)
    }

    #[test]
    fn test_member_gets_own_sources() {
        let temp_dir = TempDir::new().unwrap();
        let (store, directory) = directory(&temp_dir);
        let id = store
            .create_user(NewUser {
                tenant_id: "acme".to_string(),
                email: "ana@acme.test".to_string(),
                role: "member".to_string(),
                allowed_sources: vec!["public".to_string(), "finance".to_string()],
            })
            .unwrap();

        let context = directory.resolve(&id).unwrap();
        assert_eq!(context.tenant_id, "acme");
        assert!(!context.is_admin());
        assert!(context.allows("acme", "finance"));
        assert!(!context.allows("acme", "hr"));
        assert!(!context.allows("globex", "finance"));
    }

    #[test]
    fn test_admin_gets_all_configured_sources() {
        let temp_dir = TempDir::new().unwrap();
        let (store, directory) = directory(&temp_dir);
        let id = store
            .create_user(NewUser {
                tenant_id: "acme".to_string(),
                email: "root@acme.test".to_string(),
                role: ADMIN_ROLE.to_string(),
                allowed_sources: Vec::new(),
            })
            .unwrap();

        let context = directory.resolve(&id).unwrap();
        assert!(context.is_admin());
        assert_eq!(context.allowed_sources.len(), 3);
    }

    #[test]
    fn test_unknown_user() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, directory) = directory(&temp_dir);
        assert!(matches!(
            directory.resolve("nobody"),
            Err(SourcegateError::UserNotFound { .. })
        ));
    }

    #[test]
    fn test_context_new_dedupes_sources() {
        let context = AuthContext::new("acme", "u1", "member", ["public", "public", "hr"]);
        assert_eq!(context.allowed_sources.len(), 2);
    }
}
