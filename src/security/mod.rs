//! Security Module
//!
//! Authorization (role/permission matrix) and per-caller rate limiting.

pub mod authorization;
pub mod rate_limit;

pub use authorization::{
    api_key_fingerprint, resolve_static, AuthBackendMode, AuthResolver, Permission, PgRoleStore,
    Role, RoleStore, RoleStoreError,
};
pub use rate_limit::{RateLimitExceeded, RateLimiter, RequestLimiter};
