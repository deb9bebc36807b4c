//! Seccomp profile strategy.

use crate::policy::field::{FieldError, FieldPath};

/// Profile that allows any other profile.
pub const ALLOW_ANY: &str = "*";

/// Allowed seccomp profiles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeccompStrategy {
    allowed: Vec<String>,
}

impl SeccompStrategy {
    /// A strategy over the policy's allowed profiles.
    pub fn new(allowed: &[String]) -> Self {
        Self {
            allowed: allowed.to_vec(),
        }
    }

    fn allow_any(&self) -> bool {
        self.allowed.iter().any(|p| p == ALLOW_ANY)
    }

    /// First allowed profile that is not the wildcard.
    pub fn generate(&self) -> Option<String> {
        self.allowed.iter().find(|p| *p != ALLOW_ANY).cloned()
    }

    /// Check the effective `profile`. An unset or empty profile is always
    /// accepted.
    pub fn validate(&self, path: &FieldPath, profile: Option<&str>) -> Vec<FieldError> {
        let Some(profile) = profile.filter(|p| !p.is_empty()) else {
            return Vec::new();
        };
        if self.allowed.is_empty() {
            return vec![FieldError::forbidden(path.clone(), "seccomp may not be set")];
        }
        if self.allow_any() || self.allowed.iter().any(|p| p == profile) {
            return Vec::new();
        }
        vec![FieldError::forbidden(
            path.clone(),
            format!(
                "{profile} is not a valid seccomp profile. Valid values are {}",
                self.allowed.join(", ")
            ),
        )]
    }
}
