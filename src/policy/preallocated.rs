//! Providers whose values come from the namespace's allocation.
//!
//! A policy may leave the UID range, SELinux level or group ranges unset
//! and ask for the values the controller recorded on the namespace. Those
//! are filled into a copy of the policy before its strategies are built.

use super::provider::Provider;
use super::ProviderError;
use crate::config::AnnotationKeys;
use crate::mcs::Label;
use crate::types::{
    GroupStrategyType, IdRange, Namespace, RunAsUserStrategyType, SeLinuxOptions,
    SeLinuxStrategyType, SecurityPolicy,
};
use crate::uid::Block;

/// Whether `policy` needs values from the namespace.
pub fn requires_preallocation(policy: &SecurityPolicy) -> bool {
    let user = policy.run_as_user.strategy == RunAsUserStrategyType::MustRunAsRange
        && (policy.run_as_user.uid_range_min.is_none() || policy.run_as_user.uid_range_max.is_none());
    let se_linux = policy.se_linux_context.strategy == SeLinuxStrategyType::MustRunAs
        && policy
            .se_linux_context
            .se_linux_options
            .as_ref()
            .map_or(true, |o| o.level.is_empty());
    let fs_group = policy.fs_group.strategy == GroupStrategyType::MustRunAs && policy.fs_group.ranges.is_empty();
    let supplemental = policy.supplemental_groups.strategy == GroupStrategyType::MustRunAs
        && policy.supplemental_groups.ranges.is_empty();
    user || se_linux || fs_group || supplemental
}

/// Build a provider for `policy`, resolving unset values from `namespace`.
///
/// `policy` itself is never modified.
///
/// # Errors
///
/// [`ProviderError::Preallocated`] if a needed annotation is missing or
/// malformed, [`ProviderError::Strategy`] if the resolved policy is still
/// incomplete.
pub fn create_provider(
    policy: &SecurityPolicy,
    namespace: Option<&Namespace>,
    keys: &AnnotationKeys,
) -> Result<Provider, ProviderError> {
    let mut resolved = policy.clone();
    if requires_preallocation(policy) {
        let lookup = Lookup {
            namespace,
            policy: &policy.name,
            keys,
        };
        resolve(&mut resolved, &lookup)?;
    }
    Ok(Provider::new(resolved)?)
}

struct Lookup<'a> {
    namespace: Option<&'a Namespace>,
    policy: &'a str,
    keys: &'a AnnotationKeys,
}

impl Lookup<'_> {
    fn error(&self, kind: &'static str, reason: impl Into<String>) -> ProviderError {
        ProviderError::Preallocated {
            kind,
            namespace: self.namespace.map(|n| n.name.clone()).unwrap_or_default(),
            policy: self.policy.to_owned(),
            reason: reason.into(),
        }
    }

    fn annotation(&self, kind: &'static str, key: &str) -> Result<&str, ProviderError> {
        let namespace = self
            .namespace
            .ok_or_else(|| self.error(kind, "namespace not found"))?;
        match namespace.annotation(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            Some(_) => Err(self.error(kind, format!("annotation {key} is empty"))),
            None => Err(self.error(kind, format!("annotation {key} is not set"))),
        }
    }

    fn uid_block(&self) -> Result<Block, ProviderError> {
        let value = self.annotation("uid", &self.keys.uid_range)?;
        Block::parse(value).map_err(|e| self.error("uid", e.to_string()))
    }

    fn mcs_level(&self) -> Result<String, ProviderError> {
        let value = self.annotation("mcs", &self.keys.mcs)?;
        Label::parse(value).map_err(|e| self.error("mcs", e.to_string()))?;
        Ok(value.to_owned())
    }

    /// Group blocks, falling back to the UID block when the namespace has no
    /// supplemental group annotation.
    fn group_blocks(&self) -> Result<Vec<Block>, ProviderError> {
        let has_groups = self
            .namespace
            .and_then(|n| n.annotation(&self.keys.supplemental_groups))
            .is_some();
        let key = if has_groups {
            &self.keys.supplemental_groups
        } else {
            &self.keys.uid_range
        };
        let value = self.annotation("group", key)?;
        let blocks = value
            .split(',')
            .map(|part| Block::parse(part.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.error("group", e.to_string()))?;
        if blocks.is_empty() {
            return Err(self.error("group", format!("annotation {key} lists no blocks")));
        }
        Ok(blocks)
    }
}

fn resolve(policy: &mut SecurityPolicy, lookup: &Lookup<'_>) -> Result<(), ProviderError> {
    let run_as_user = &mut policy.run_as_user;
    if run_as_user.strategy == RunAsUserStrategyType::MustRunAsRange
        && (run_as_user.uid_range_min.is_none() || run_as_user.uid_range_max.is_none())
    {
        let block = lookup.uid_block()?;
        run_as_user.uid_range_min = Some(i64::from(block.start));
        run_as_user.uid_range_max = Some(i64::from(block.end));
    }

    let se_linux = &mut policy.se_linux_context;
    if se_linux.strategy == SeLinuxStrategyType::MustRunAs {
        let options = se_linux.se_linux_options.get_or_insert_with(SeLinuxOptions::default);
        if options.level.is_empty() {
            options.level = lookup.mcs_level()?;
        }
    }

    if policy.fs_group.strategy == GroupStrategyType::MustRunAs && policy.fs_group.ranges.is_empty() {
        let blocks = lookup.group_blocks()?;
        if let Some(first) = blocks.first() {
            let gid = i64::from(first.start);
            policy.fs_group.ranges = vec![IdRange { min: gid, max: gid }];
        }
    }

    if policy.supplemental_groups.strategy == GroupStrategyType::MustRunAs
        && policy.supplemental_groups.ranges.is_empty()
    {
        policy.supplemental_groups.ranges = lookup
            .group_blocks()?
            .iter()
            .map(|b| IdRange {
                min: i64::from(b.start),
                max: i64::from(b.end),
            })
            .collect();
    }
    Ok(())
}
