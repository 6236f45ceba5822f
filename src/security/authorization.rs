//! Authorization Resolver
//!
//! Maps a caller credential to a role and a role to its permission set.
//! Two resolution strategies: a static prefix convention and a persisted
//! lookup keyed by credential fingerprint. The lookup path degrades to the
//! static convention on store failure, clamped so an outage can never mint
//! elevated roles.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Ordered by permission superset: each role holds everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Public,
    Member,
    Elder,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    QueryPublic,
    QuerySensitive,
    QuerySacred,
    ExportData,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Public => "public",
            Role::Member => "member",
            Role::Elder => "elder",
            Role::Admin => "admin",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "public" => Some(Role::Public),
            "member" => Some(Role::Member),
            "elder" => Some(Role::Elder),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// The fixed role -> permission matrix.
    pub fn permissions(self) -> &'static [Permission] {
        match self {
            Role::Public => &[Permission::QueryPublic],
            Role::Member => &[Permission::QueryPublic, Permission::QuerySensitive],
            Role::Elder => &[
                Permission::QueryPublic,
                Permission::QuerySensitive,
                Permission::QuerySacred,
            ],
            Role::Admin => &[
                Permission::QueryPublic,
                Permission::QuerySensitive,
                Permission::QuerySacred,
                Permission::ExportData,
            ],
        }
    }

    /// Pure set-membership check. No side effects, no I/O.
    pub fn has_permission(self, required: Permission) -> bool {
        self.permissions().contains(&required)
    }
}

/// Static convention: empty credential is public; a role prefix (or the bare
/// role word) selects that role; any other non-empty credential is a member.
/// Failing open toward the lowest elevated privilege, never toward admin.
pub fn resolve_static(credential: &str) -> Role {
    let credential = credential.trim();
    if credential.is_empty() {
        return Role::Public;
    }
    for role in [Role::Admin, Role::Elder, Role::Member, Role::Public] {
        let word = role.as_str();
        if credential == word || credential.starts_with(&format!("{word}:")) {
            return role;
        }
    }
    Role::Member
}

/// Stable fingerprint used as the persisted lookup key. Raw credentials are
/// never stored or logged.
pub fn api_key_fingerprint(credential: &str) -> String {
    let digest = Sha256::digest(credential.trim().as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

#[derive(Debug, Clone, Error)]
#[error("role store error: {0}")]
pub struct RoleStoreError(pub String);

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Look up an active role mapping by credential fingerprint.
    async fn role_for_fingerprint(&self, fingerprint: &str)
        -> Result<Option<Role>, RoleStoreError>;
}

/// Persisted mappings in `governance.api_keys (key_hash, role, active)`.
pub struct PgRoleStore {
    pool: PgPool,
}

impl PgRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStore for PgRoleStore {
    async fn role_for_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Role>, RoleStoreError> {
        let row: Option<String> = sqlx::query_scalar(
            "SELECT role FROM governance.api_keys WHERE key_hash = $1 AND active",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| RoleStoreError(err.to_string()))?;

        match row {
            Some(name) => match Role::parse(&name) {
                Some(role) => Ok(Some(role)),
                None => Err(RoleStoreError(format!("unknown role '{name}' in store"))),
            },
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackendMode {
    Static,
    Lookup,
}

/// Owned, injected resolver (never a process-wide singleton).
#[derive(Clone)]
pub struct AuthResolver {
    mode: AuthBackendMode,
    store: Option<Arc<dyn RoleStore>>,
}

impl AuthResolver {
    pub fn static_only() -> Self {
        Self {
            mode: AuthBackendMode::Static,
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn RoleStore>) -> Self {
        Self {
            mode: AuthBackendMode::Lookup,
            store: Some(store),
        }
    }

    /// Resolve the caller's role. Never fails: availability is favored over
    /// hard-failing on store errors, but the fallback is clamped to member.
    pub async fn resolve_role(&self, credential: &str) -> Role {
        let trimmed = credential.trim();
        if trimmed.is_empty() {
            return Role::Public;
        }

        let store = match (self.mode, &self.store) {
            (AuthBackendMode::Lookup, Some(store)) => store,
            _ => return resolve_static(trimmed),
        };

        let fingerprint = api_key_fingerprint(trimmed);
        match store.role_for_fingerprint(&fingerprint).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                debug!("authz.fingerprint_not_found");
                resolve_static(trimmed).min(Role::Member)
            }
            Err(err) => {
                warn!(error = %err, "authz.role_store_failed");
                resolve_static(trimmed).min(Role::Member)
            }
        }
    }
}
