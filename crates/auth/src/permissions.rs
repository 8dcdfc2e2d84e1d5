use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult};
use carebase_events::domain_events;

/// Permission name in `applet.action` form (e.g. `client.view`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName(String);

impl PermissionName {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let Some((applet, action)) = raw.split_once('.') else {
            return Err(DomainError::validation(format!("permission `{raw}` must be `applet.action`")));
        };
        if !is_label(applet) || !is_label(action) {
            return Err(DomainError::validation(format!(
                "permission `{raw}` must be two lowercase labels joined by `.`"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn from_parts(applet: &str, action: &str) -> DomainResult<Self> {
        Self::parse(&format!("{applet}.{action}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn applet(&self) -> &str {
        self.0.split_once('.').map(|(a, _)| a).unwrap_or_default()
    }

    pub fn action(&self) -> &str {
        self.0.split_once('.').map(|(_, a)| a).unwrap_or_default()
    }
}

fn is_label(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl core::fmt::Display for PermissionName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PermissionName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PermissionName::parse(&value)
    }
}

impl From<PermissionName> for String {
    fn from(value: PermissionName) -> Self {
        value.0
    }
}

/// The level of the hierarchy a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Org,
    Facility,
    Program,
    Client,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Global => "global",
            ScopeKind::Org => "org",
            ScopeKind::Facility => "facility",
            ScopeKind::Program => "program",
            ScopeKind::Client => "client",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDefined {
    pub applet: String,
    pub action: String,
    pub scope_type: ScopeKind,
    #[serde(default)]
    pub requires_mfa: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl PermissionDefined {
    pub fn name(&self) -> DomainResult<PermissionName> {
        PermissionName::from_parts(&self.applet, &self.action)
    }
}

domain_events! {
    /// Permission catalog events (stream per permission id).
    pub enum PermissionEvent in "permission" {
        Defined(PermissionDefined) = "permission.defined",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_applet_action() {
        let p = PermissionName::parse("medication.administer").unwrap();
        assert_eq!(p.applet(), "medication");
        assert_eq!(p.action(), "administer");
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in ["medication", "medication.", ".view", "Client.view", "a.b.c", "client.view all"] {
            assert!(PermissionName::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn defined_event_builds_name() {
        let ev = PermissionDefined {
            applet: "organization".into(),
            action: "create_ou".into(),
            scope_type: ScopeKind::Org,
            requires_mfa: true,
            description: None,
        };
        assert_eq!(ev.name().unwrap().as_str(), "organization.create_ou");
    }
}
