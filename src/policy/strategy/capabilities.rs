//! Capability defaulting and checks.
//!
//! Comparisons are case-sensitive; only the `*`/`ALL` wildcard is matched
//! without regard to case.

use std::collections::BTreeSet;

use super::is_capability_wildcard;
use crate::policy::field::{FieldError, FieldPath};
use crate::types::Capabilities;

/// Capabilities a policy adds, requires dropped, and allows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitiesStrategy {
    default_add: Vec<String>,
    required_drop: Vec<String>,
    allowed: Vec<String>,
}

impl CapabilitiesStrategy {
    /// A strategy from the policy's three capability lists.
    pub fn new(default_add: &[String], required_drop: &[String], allowed: &[String]) -> Self {
        Self {
            default_add: default_add.to_vec(),
            required_drop: required_drop.to_vec(),
            allowed: allowed.to_vec(),
        }
    }

    /// Merge the defaults into `requested`.
    ///
    /// Default adds the container drops are left out. When nothing changes
    /// the request is returned as is.
    pub fn generate(&self, requested: Option<&Capabilities>) -> Option<Capabilities> {
        let container_add: BTreeSet<&str> = requested
            .map(|c| c.add.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let container_drop: BTreeSet<&str> = requested
            .map(|c| c.drop.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let mut add = container_add.clone();
        add.extend(
            self.default_add
                .iter()
                .map(String::as_str)
                .filter(|c| !container_drop.contains(c)),
        );
        let mut drop = container_drop.clone();
        drop.extend(self.required_drop.iter().map(String::as_str));

        if add.len() == container_add.len() && drop.len() == container_drop.len() {
            return requested.cloned();
        }
        Some(Capabilities {
            add: add.into_iter().map(str::to_owned).collect(),
            drop: drop.into_iter().map(str::to_owned).collect(),
        })
    }

    /// Check `capabilities`. `path` is the `capabilities` field.
    pub fn validate(&self, path: &FieldPath, capabilities: Option<&Capabilities>) -> Vec<FieldError> {
        let Some(capabilities) = capabilities else {
            if self.default_add.is_empty() && self.required_drop.is_empty() {
                return Vec::new();
            }
            return vec![FieldError::invalid(
                path.clone(),
                "nil",
                "required capabilities are not set on the securityContext",
            )];
        };

        let mut errors = Vec::new();
        let allow_all = self.allowed.iter().any(|c| is_capability_wildcard(c));
        if !allow_all {
            for cap in &capabilities.add {
                if !self.default_add.contains(cap) && !self.allowed.contains(cap) {
                    errors.push(FieldError::invalid(
                        path.child("add"),
                        cap,
                        "capability may not be added",
                    ));
                }
            }
        }

        let drops_all = capabilities
            .drop
            .iter()
            .any(|c| c.eq_ignore_ascii_case("ALL"));
        for required in &self.required_drop {
            if !drops_all && !capabilities.drop.contains(required) {
                errors.push(FieldError::invalid(
                    path.child("drop"),
                    &capabilities.drop,
                    format!("{required} is required to be dropped but was not found"),
                ));
            }
        }
        errors
    }
}
