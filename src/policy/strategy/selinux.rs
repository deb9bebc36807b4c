//! SELinux strategies.

use super::StrategyError;
use crate::mcs::Label;
use crate::policy::field::{FieldError, FieldPath};
use crate::types::{SeLinuxOptions, SeLinuxStrategyOptions, SeLinuxStrategyType};

/// How SELinux options are chosen and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeLinuxStrategy {
    /// Every non-empty configured field must match.
    MustRunAs(SeLinuxOptions),
    /// No constraint.
    RunAsAny,
}

impl SeLinuxStrategy {
    /// Build the strategy described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::MissingSeLinuxOptions`] for `MustRunAs`
    /// without options.
    pub fn new(options: &SeLinuxStrategyOptions) -> Result<Self, StrategyError> {
        match options.strategy {
            SeLinuxStrategyType::MustRunAs => options
                .se_linux_options
                .clone()
                .map(Self::MustRunAs)
                .ok_or(StrategyError::MissingSeLinuxOptions),
            SeLinuxStrategyType::RunAsAny => Ok(Self::RunAsAny),
        }
    }

    /// Options to set where none are set.
    pub fn generate(&self) -> Option<SeLinuxOptions> {
        match self {
            Self::MustRunAs(options) => Some(options.clone()),
            Self::RunAsAny => None,
        }
    }

    /// Check `observed`. `path` is the `seLinuxOptions` field.
    pub fn validate(&self, path: &FieldPath, observed: Option<&SeLinuxOptions>) -> Vec<FieldError> {
        let Self::MustRunAs(required) = self else {
            return Vec::new();
        };
        let Some(observed) = observed else {
            return vec![FieldError::required(path.clone(), "")];
        };

        let mut errors = Vec::new();
        if !required.level.is_empty() && !levels_match(&required.level, &observed.level) {
            errors.push(mismatch(path, "level", &required.level, &observed.level));
        }
        for (name, wanted, found) in [
            ("user", &required.user, &observed.user),
            ("role", &required.role, &observed.role),
            ("type", &required.type_, &observed.type_),
        ] {
            if !wanted.is_empty() && wanted != found {
                errors.push(mismatch(path, name, wanted, found));
            }
        }
        errors
    }
}

fn mismatch(path: &FieldPath, field: &str, wanted: &str, found: &str) -> FieldError {
    FieldError::invalid(
        path.child(field),
        found,
        format!("does not match required {field}.  Found {found:?}, wanted {wanted:?}"),
    )
}

/// Levels match when their text is equal or they name the same category
/// set, whatever the order (`s0:c0,c1` and `s0:c1,c0`).
fn levels_match(wanted: &str, found: &str) -> bool {
    if wanted == found {
        return true;
    }
    match (Label::parse(wanted), Label::parse(found)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
