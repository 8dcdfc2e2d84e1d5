use serde::{Deserialize, Serialize};

use carebase_core::{OrganizationId, ScopePath};

use crate::PermissionName;

/// Resolved claims for the current actor.
///
/// How these are derived from a login session is outside this crate; the
/// engine only consumes them. A missing `organization_id` means platform-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorClaims {
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    /// Coarse role name (e.g. `super_admin`, `provider_admin`).
    pub role: String,
    #[serde(default)]
    pub scope_path: Option<ScopePath>,
    #[serde(default)]
    pub permissions: Vec<PermissionName>,
}

impl ActorClaims {
    pub fn is_platform_wide(&self) -> bool {
        self.organization_id.is_none()
    }
}
