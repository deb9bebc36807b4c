//! FSGroup and supplemental group strategies.

use super::StrategyError;
use crate::policy::field::{FieldError, FieldPath};
use crate::types::{GroupStrategyOptions, GroupStrategyType, IdRange};

/// How group IDs are chosen and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStrategy {
    /// Every group must fall within one of the ranges.
    MustRunAs(Vec<IdRange>),
    /// No constraint.
    RunAsAny,
}

impl GroupStrategy {
    /// Build the strategy for `field` (`fsGroup` or `supplementalGroups`)
    /// described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::MissingGroupRanges`] for `MustRunAs`
    /// without ranges.
    pub fn new(field: &'static str, options: &GroupStrategyOptions) -> Result<Self, StrategyError> {
        match options.strategy {
            GroupStrategyType::MustRunAs if options.ranges.is_empty() => {
                Err(StrategyError::MissingGroupRanges { field })
            }
            GroupStrategyType::MustRunAs => Ok(Self::MustRunAs(options.ranges.clone())),
            GroupStrategyType::RunAsAny => Ok(Self::RunAsAny),
        }
    }

    /// Lowest value of the lowest range, for single-valued fields.
    pub fn generate_single(&self) -> Option<i64> {
        match self {
            Self::MustRunAs(ranges) => ranges.iter().map(|r| r.min).min(),
            Self::RunAsAny => None,
        }
    }

    /// Default group list.
    pub fn generate(&self) -> Vec<i64> {
        self.generate_single().into_iter().collect()
    }

    /// Check `groups`. An empty list fails under `MustRunAs`.
    pub fn validate(&self, path: &FieldPath, groups: &[i64]) -> Vec<FieldError> {
        let Self::MustRunAs(ranges) = self else {
            return Vec::new();
        };
        if groups.is_empty() {
            return vec![FieldError::invalid(
                path.clone(),
                groups,
                "unable to validate empty groups against required ranges",
            )];
        }
        groups
            .iter()
            .filter(|group| !ranges.iter().any(|r| r.contains(**group)))
            .map(|group| {
                FieldError::invalid(path.clone(), groups, format!("{group} is not an allowed group"))
            })
            .collect()
    }
}
