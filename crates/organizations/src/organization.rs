use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, ScopePath};
use carebase_events::domain_events;

/// Depth of a root organization path (`root.<org>`).
pub const ROOT_DEPTH: usize = 2;

/// Organization kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationKind {
    PlatformOwner,
    Provider,
    /// Consultant organization working on behalf of providers.
    #[serde(alias = "partner")]
    ProviderPartner,
}

impl OrganizationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OrganizationKind::PlatformOwner => "platform_owner",
            OrganizationKind::Provider => "provider",
            OrganizationKind::ProviderPartner => "provider_partner",
        }
    }
}

/// Root organizations sit at depth 2 with no parent; everything deeper names a
/// parent and lies strictly under it.
pub fn validate_hierarchy(path: &ScopePath, parent_path: Option<&ScopePath>) -> DomainResult<()> {
    let depth = path.depth();
    if depth < ROOT_DEPTH {
        return Err(DomainError::validation(format!(
            "organization path `{path}` must have at least {ROOT_DEPTH} labels"
        )));
    }

    match (depth == ROOT_DEPTH, parent_path) {
        (true, None) => Ok(()),
        (true, Some(parent)) => Err(DomainError::invariant(format!(
            "root organization `{path}` cannot have parent `{parent}`"
        ))),
        (false, None) => Err(DomainError::invariant(format!(
            "organization `{path}` at depth {depth} requires a parent path"
        ))),
        (false, Some(parent)) if path.is_strict_descendant_of(parent) => Ok(()),
        (false, Some(parent)) => Err(DomainError::invariant(format!(
            "organization `{path}` is not a descendant of parent `{parent}`"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationCreated {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub kind: OrganizationKind,
    pub path: ScopePath,
    #[serde(default)]
    pub parent_path: Option<ScopePath>,
    #[serde(default)]
    pub tax_number: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl OrganizationCreated {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("organization name cannot be empty"));
        }
        validate_hierarchy(&self.path, self.parent_path.as_ref())
    }
}

/// Partial update: `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationUpdated {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tax_number: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationStatusChanged {
    #[serde(default)]
    pub reason: Option<String>,
}

domain_events! {
    /// Organization lifecycle (stream per organization id).
    pub enum OrganizationEvent in "organization" {
        Created(OrganizationCreated) = "organization.created",
        Updated(OrganizationUpdated) = "organization.updated",
        Deactivated(OrganizationStatusChanged) = "organization.deactivated",
        Reactivated(OrganizationStatusChanged) = "organization.reactivated",
        Deleted(OrganizationStatusChanged) = "organization.deleted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn path(s: &str) -> ScopePath {
        ScopePath::parse(s).unwrap()
    }

    #[test]
    fn root_has_no_parent() {
        assert!(validate_hierarchy(&path("root.acme"), None).is_ok());
        assert!(validate_hierarchy(&path("root.acme"), Some(&path("root"))).is_err());
    }

    #[test]
    fn child_needs_ancestor_parent() {
        assert!(validate_hierarchy(&path("root.acme.north"), Some(&path("root.acme"))).is_ok());
        assert!(validate_hierarchy(&path("root.acme.north.ward"), Some(&path("root.acme"))).is_ok());
        assert!(validate_hierarchy(&path("root.acme.north"), None).is_err());
        assert!(validate_hierarchy(&path("root.acme.north"), Some(&path("root.other"))).is_err());
        assert!(validate_hierarchy(&path("root.acme.north"), Some(&path("root.acme.north"))).is_err());
    }

    #[test]
    fn single_label_path_is_rejected() {
        assert!(validate_hierarchy(&path("root"), None).is_err());
    }

    #[test]
    fn partner_alias_deserializes() {
        let kind: OrganizationKind = serde_json::from_str("\"partner\"").unwrap();
        assert_eq!(kind, OrganizationKind::ProviderPartner);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"provider_partner\"");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            .. ProptestConfig::default()
        })]

        /// Property: any path built by extending a valid parent validates against it.
        #[test]
        fn extended_paths_validate(suffix in prop::collection::vec("[a-z][a-z0-9_]{0,5}", 1..6)) {
            let parent = path("root.acme");
            let child = ScopePath::parse(&format!("root.acme.{}", suffix.join("."))).unwrap();
            prop_assert!(validate_hierarchy(&child, Some(&parent)).is_ok());
        }
    }
}
