//! Pure, in-process, policy-as-data authorization engine (C5).
//!
//! No teacher crate is a direct fit: `r2e-openfga` delegates decisions to an
//! external FGA server, which is the wrong shape for a decision that must be
//! sub-millisecond and I/O-free. This engine is grounded instead on the
//! *shape* of a guard — a pure function over an identity and a context — and
//! precomputes an action-indexed index at load time the way a router
//! precomputes its dispatch table.

use std::collections::HashMap;

use serde::Deserialize;
use sophrosyne_core::domain::{AuthPrincipal, AuthorizationRequest, Resource};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalMatch {
    Id(Uuid),
    AnyAdmin,
    Any,
}

impl PrincipalMatch {
    fn matches(&self, principal: &AuthPrincipal) -> bool {
        match self {
            PrincipalMatch::Id(id) => *id == principal.id,
            PrincipalMatch::AnyAdmin => principal.is_admin,
            PrincipalMatch::Any => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceMatch {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
}

impl ResourceMatch {
    fn matches(&self, resource: Option<&Resource>) -> bool {
        let Some(resource) = resource else {
            // A rule scoped to a resource cannot match a request with none.
            return self.entity_type.is_none() && self.entity_id.is_none();
        };
        if let Some(expected_type) = &self.entity_type {
            if *expected_type != resource.entity_type {
                return false;
            }
        }
        if let Some(expected_id) = self.entity_id {
            if Some(expected_id) != resource.entity_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    pub effect: Effect,
    pub principals: Vec<PrincipalMatch>,
    pub actions: Vec<String>,
    #[serde(default)]
    pub resource: Option<ResourceMatch>,
}

impl PolicyRule {
    fn matches(&self, req: &AuthorizationRequest) -> bool {
        self.principals.iter().any(|p| p.matches(&req.principal))
            && match &self.resource {
                Some(rm) => rm.matches(req.resource.as_ref()),
                None => true,
            }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyBundle {
    rules: Vec<PolicyRule>,
}

/// Loaded policy bundle, precomputed into an action-indexed map so a
/// decision never scans rules irrelevant to the requested action.
pub struct PolicySet {
    by_action: HashMap<String, Vec<PolicyRule>>,
}

impl PolicySet {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let bundle: PolicyBundle = serde_yaml::from_str(yaml)?;
        Ok(Self::from_rules(bundle.rules))
    }

    pub fn from_rules(rules: Vec<PolicyRule>) -> Self {
        let mut by_action: HashMap<String, Vec<PolicyRule>> = HashMap::new();
        for rule in rules {
            for action in &rule.actions {
                by_action
                    .entry(action.clone())
                    .or_default()
                    .push(rule.clone());
            }
        }
        Self { by_action }
    }

    pub fn empty() -> Self {
        Self {
            by_action: HashMap::new(),
        }
    }

    /// Decide whether `req` is permitted. Default deny. An explicit `Deny`
    /// rule always wins over an `Allow`/admin-bypass rule for the same
    /// action and resource, even for admin principals.
    pub fn authorize(&self, req: &AuthorizationRequest) -> bool {
        let Some(rules) = self.by_action.get(&req.action) else {
            return false;
        };

        let denied = rules
            .iter()
            .any(|r| r.effect == Effect::Deny && r.matches(req));
        if denied {
            return false;
        }

        rules
            .iter()
            .any(|r| r.effect == Effect::Allow && r.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: Uuid, is_admin: bool) -> AuthPrincipal {
        AuthPrincipal { id, is_admin }
    }

    #[test]
    fn default_deny_for_unknown_action() {
        let policies = PolicySet::empty();
        let req = AuthorizationRequest {
            principal: principal(Uuid::new_v4(), true),
            action: "users.create".into(),
            resource: None,
        };
        assert!(!policies.authorize(&req));
    }

    #[test]
    fn admin_bypass_allows_when_no_deny_present() {
        let policies = PolicySet::from_rules(vec![PolicyRule {
            effect: Effect::Allow,
            principals: vec![PrincipalMatch::AnyAdmin],
            actions: vec!["users.create".into()],
            resource: None,
        }]);
        let req = AuthorizationRequest {
            principal: principal(Uuid::new_v4(), true),
            action: "users.create".into(),
            resource: None,
        };
        assert!(policies.authorize(&req));
    }

    #[test]
    fn non_admin_denied_even_with_admin_allow_rule() {
        let policies = PolicySet::from_rules(vec![PolicyRule {
            effect: Effect::Allow,
            principals: vec![PrincipalMatch::AnyAdmin],
            actions: vec!["users.create".into()],
            resource: None,
        }]);
        let req = AuthorizationRequest {
            principal: principal(Uuid::new_v4(), false),
            action: "users.create".into(),
            resource: None,
        };
        assert!(!policies.authorize(&req));
    }

    #[test]
    fn explicit_deny_beats_admin_allow() {
        let admin_id = Uuid::new_v4();
        let policies = PolicySet::from_rules(vec![
            PolicyRule {
                effect: Effect::Allow,
                principals: vec![PrincipalMatch::AnyAdmin],
                actions: vec!["users.delete".into()],
                resource: None,
            },
            PolicyRule {
                effect: Effect::Deny,
                principals: vec![PrincipalMatch::Id(admin_id)],
                actions: vec!["users.delete".into()],
                resource: None,
            },
        ]);
        let req = AuthorizationRequest {
            principal: principal(admin_id, true),
            action: "users.delete".into(),
            resource: None,
        };
        assert!(!policies.authorize(&req));
    }

    #[test]
    fn resource_scoped_rule_only_matches_named_entity_type() {
        let id = Uuid::new_v4();
        let policies = PolicySet::from_rules(vec![PolicyRule {
            effect: Effect::Allow,
            principals: vec![PrincipalMatch::Id(id)],
            actions: vec!["profiles.update".into()],
            resource: Some(ResourceMatch {
                entity_type: Some("profile".into()),
                entity_id: None,
            }),
        }]);

        let matching = AuthorizationRequest {
            principal: principal(id, false),
            action: "profiles.update".into(),
            resource: Some(sophrosyne_core::domain::Resource {
                entity_type: "profile".into(),
                entity_id: Some(Uuid::new_v4()),
            }),
        };
        assert!(policies.authorize(&matching));

        let mismatched = AuthorizationRequest {
            principal: principal(id, false),
            action: "profiles.update".into(),
            resource: Some(sophrosyne_core::domain::Resource {
                entity_type: "check".into(),
                entity_id: None,
            }),
        };
        assert!(!policies.authorize(&mismatched));
    }
}
