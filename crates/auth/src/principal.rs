use serde::{Deserialize, Serialize};

use carebase_core::UserId;

use crate::{ActorClaims, PermissionName};

/// The current actor: an opaque user identity plus precomputed claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub claims: ActorClaims,
}

impl Actor {
    pub fn new(user_id: UserId, claims: ActorClaims) -> Self {
        Self { user_id, claims }
    }

    /// Fast path for callers that only hold claims.
    pub fn claims_permit(&self, permission: &PermissionName) -> bool {
        self.claims.permissions.iter().any(|p| p == permission)
    }
}
