//! RunAsUser strategies.

use super::StrategyError;
use crate::policy::field::{FieldError, FieldPath};
use crate::types::{RunAsUserStrategyOptions, RunAsUserStrategyType};

/// How a container's UID is chosen and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAsUserStrategy {
    /// Exactly `uid`.
    MustRunAs {
        /// The required UID.
        uid: i64,
    },
    /// Any UID in `min..=max`.
    MustRunAsRange {
        /// Lowest allowed UID.
        min: i64,
        /// Highest allowed UID.
        max: i64,
    },
    /// Any UID but root; the image may pick it.
    MustRunAsNonRoot,
    /// No constraint.
    RunAsAny,
}

impl RunAsUserStrategy {
    /// Build the strategy described by `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the options lack the UID or bounds the strategy
    /// needs, or the bounds are reversed.
    pub fn new(options: &RunAsUserStrategyOptions) -> Result<Self, StrategyError> {
        match options.strategy {
            RunAsUserStrategyType::MustRunAs => options
                .uid
                .map(|uid| Self::MustRunAs { uid })
                .ok_or(StrategyError::MissingUid),
            RunAsUserStrategyType::MustRunAsRange => {
                let (Some(min), Some(max)) = (options.uid_range_min, options.uid_range_max) else {
                    return Err(StrategyError::MissingUidRange);
                };
                if min > max {
                    return Err(StrategyError::InvalidUidRange { min, max });
                }
                Ok(Self::MustRunAsRange { min, max })
            }
            RunAsUserStrategyType::MustRunAsNonRoot => Ok(Self::MustRunAsNonRoot),
            RunAsUserStrategyType::RunAsAny => Ok(Self::RunAsAny),
        }
    }

    /// The UID to set on a container that does not set one.
    pub fn generate(&self) -> Option<i64> {
        match self {
            Self::MustRunAs { uid } => Some(*uid),
            Self::MustRunAsRange { min, .. } => Some(*min),
            Self::MustRunAsNonRoot | Self::RunAsAny => None,
        }
    }

    /// Check the effective `run_as_user` and `run_as_non_root` of container
    /// `container`. `path` is the container's `securityContext`.
    pub fn validate(
        &self,
        path: &FieldPath,
        container: &str,
        run_as_non_root: Option<bool>,
        run_as_user: Option<i64>,
    ) -> Vec<FieldError> {
        let uid_path = path.child("runAsUser");
        match *self {
            Self::MustRunAs { uid } => match run_as_user {
                None => vec![FieldError::required(uid_path, "")],
                Some(found) if found != uid => vec![FieldError::invalid(
                    uid_path,
                    found,
                    format!(
                        "UID on container {container} does not match required UID.  Found {found}, wanted {uid}"
                    ),
                )],
                Some(_) => Vec::new(),
            },
            Self::MustRunAsRange { min, max } => match run_as_user {
                None => vec![FieldError::required(uid_path, "")],
                Some(found) if found < min || found > max => vec![FieldError::invalid(
                    uid_path,
                    found,
                    format!(
                        "UID on container {container} does not match required range.  Found {found}, required min: {min} max: {max}"
                    ),
                )],
                Some(_) => Vec::new(),
            },
            Self::MustRunAsNonRoot => {
                let mut errors = Vec::new();
                let non_root_path = path.child("runAsNonRoot");
                match (run_as_non_root, run_as_user) {
                    (None, None) => {
                        errors.push(FieldError::required(non_root_path, "must be true"));
                    }
                    (Some(false), _) => {
                        errors.push(FieldError::invalid(non_root_path, false, "must be true"));
                    }
                    _ => {}
                }
                if run_as_user == Some(0) {
                    errors.push(FieldError::invalid(
                        uid_path,
                        0_i64,
                        "running with the root UID is forbidden",
                    ));
                }
                errors
            }
            Self::RunAsAny => Vec::new(),
        }
    }
}
