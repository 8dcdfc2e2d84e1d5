//! `carebase-auth`: pure authorization model (no storage, no transport).
//!
//! - Permission definitions and names (`applet.action`), scope kinds.
//! - Roles (global templates vs organization-scoped) and user role assignments.
//! - The hierarchical permission decision over materialized scope paths.
//! - Cross-tenant access grant lifecycle and coverage rules.
//! - Impersonation session lifecycle.
//!
//! The RBAC read models themselves are built by projection handlers in
//! `carebase-infra`; this crate only defines the event payloads and rules.

pub mod authorize;
pub mod claims;
pub mod grants;
pub mod impersonation;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod users;

pub use authorize::{AuthzError, EffectivePermission, authorize, authorize_in, user_has_permission};
pub use claims::ActorClaims;
pub use grants::{AccessGrantEvent, AuthorizationType, GrantCoverage, GrantScope, GrantStatus, GrantTransition};
pub use impersonation::{ImpersonationEndReason, ImpersonationEvent, ImpersonationStatus};
pub use permissions::{PermissionEvent, PermissionName, ScopeKind};
pub use principal::Actor;
pub use roles::{RoleEvent, RoleScope};
pub use users::{AssignmentScope, UserEvent};
