//! Sysctl allow-list.

use crate::policy::field::{FieldError, FieldPath};
use crate::types::Sysctl;

/// Which sysctls a pod may set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysctlStrategy {
    /// Any sysctl.
    AllowAny,
    /// Names matching one of the patterns; a trailing `*` matches a prefix.
    /// An empty list allows none.
    Patterns(Vec<String>),
}

impl SysctlStrategy {
    /// `None` allows everything, `Some(&[])` nothing.
    pub fn new(allowed: Option<&[String]>) -> Self {
        match allowed {
            None => Self::AllowAny,
            Some(patterns) => Self::Patterns(patterns.to_vec()),
        }
    }

    /// Whether `name` may be set.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::AllowAny => true,
            Self::Patterns(patterns) => patterns.iter().any(|p| match p.strip_suffix('*') {
                Some(prefix) => name.starts_with(prefix),
                None => p == name,
            }),
        }
    }

    /// Check `sysctls`. `path` is the `sysctls` field.
    pub fn validate(&self, path: &FieldPath, sysctls: &[Sysctl]) -> Vec<FieldError> {
        if sysctls.is_empty() {
            return Vec::new();
        }
        if let Self::Patterns(patterns) = self {
            if patterns.is_empty() {
                let names: Vec<&str> = sysctls.iter().map(|s| s.name.as_str()).collect();
                return vec![FieldError::invalid(path.clone(), names.join(","), "sysctls are not allowed")];
            }
        }
        sysctls
            .iter()
            .enumerate()
            .filter(|(_, s)| !self.allows(&s.name))
            .map(|(i, s)| {
                FieldError::invalid(
                    path.index(i),
                    &s.name,
                    format!("sysctl {:?} is not allowed", s.name),
                )
            })
            .collect()
    }
}
