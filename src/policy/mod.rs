//! Security policy engine.
//!
//! Policies are matched to a requester ([`matcher`]), ordered by
//! restrictiveness ([`priority`]), turned into [`provider::Provider`]s with
//! any namespace-allocated values filled in ([`preallocated`]), and applied
//! to pods field by field ([`strategy`]).

pub mod field;
pub mod matcher;
pub mod preallocated;
pub mod priority;
pub mod provider;
pub mod strategy;
pub mod validation;

use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::types::SecurityPolicy;

pub use field::{FieldError, FieldPath};
pub use matcher::{Authorizer, PolicyMatcher};
pub use preallocated::create_provider;
pub use provider::Provider;
pub use strategy::StrategyError;
pub use validation::validate_policy;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from building a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// A value the policy takes from the namespace is unavailable.
    #[error(
        "unable to find pre-allocated {kind} annotation for namespace {namespace} while trying to configure SCC {policy}: {reason}"
    )]
    Preallocated {
        /// `uid`, `mcs` or `group`.
        kind: &'static str,
        /// Namespace consulted.
        namespace: String,
        /// Policy being configured.
        policy: String,
        /// What was wrong with the annotation.
        reason: String,
    },

    /// The policy's options do not describe a usable strategy.
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load every `*.toml` policy in `dir`, in file name order.
///
/// A policy without a name takes its file stem. A missing directory yields
/// no policies.
///
/// # Errors
///
/// Returns an error if a file cannot be read or parsed, or a policy fails
/// [`validate_policy`].
pub fn load_policies(dir: &Path) -> anyhow::Result<Vec<SecurityPolicy>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "policy directory does not exist");
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut policies = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read policy {}", path.display()))?;
        let mut policy: SecurityPolicy = toml::from_str(&contents)
            .with_context(|| format!("failed to parse policy {}", path.display()))?;
        if policy.name.is_empty() {
            policy.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        let errors = validate_policy(&policy);
        if !errors.is_empty() {
            anyhow::bail!(
                "invalid policy {} in {}: {}",
                policy.name,
                path.display(),
                field::aggregate(&errors)
            );
        }
        debug!(policy = %policy.name, path = %path.display(), "loaded policy");
        policies.push(policy);
    }
    Ok(policies)
}
