//! Structural checks on policy objects.

use super::field::{FieldError, FieldPath};
use super::strategy::is_capability_wildcard;
use crate::types::{FsType, GroupStrategyOptions, RunAsUserStrategyType, SecurityPolicy};

/// Every problem with `policy`, empty when it is usable.
pub fn validate_policy(policy: &SecurityPolicy) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if policy.name.trim().is_empty() {
        errors.push(FieldError::required(FieldPath::root("metadata").child("name"), "name is required"));
    }

    errors.extend(validate_run_as_user(policy));
    errors.extend(validate_group_ranges(&FieldPath::root("fsGroup"), &policy.fs_group));
    errors.extend(validate_group_ranges(
        &FieldPath::root("supplementalGroups"),
        &policy.supplemental_groups,
    ));

    if policy.volumes.contains(&FsType::None) && policy.volumes.len() > 1 {
        errors.push(FieldError::invalid(
            FieldPath::root("volumes"),
            policy.volumes.iter().map(FsType::as_str).collect::<Vec<_>>(),
            "if 'none' is specified, no other values are allowed",
        ));
    }

    errors.extend(validate_capabilities(policy));

    if let Some(patterns) = &policy.allowed_sysctls {
        for (i, pattern) in patterns.iter().enumerate() {
            let body = pattern.strip_suffix('*').unwrap_or(pattern);
            if pattern.is_empty() || body.contains('*') {
                errors.push(FieldError::invalid(
                    FieldPath::root("allowedSysctls").index(i),
                    pattern,
                    "must be a sysctl name, optionally ending in '*'",
                ));
            }
        }
    }
    errors
}

fn validate_run_as_user(policy: &SecurityPolicy) -> Vec<FieldError> {
    let path = FieldPath::root("runAsUser");
    let options = &policy.run_as_user;
    let mut errors = Vec::new();
    match options.strategy {
        RunAsUserStrategyType::MustRunAs => match options.uid {
            None => errors.push(FieldError::required(path.child("uid"), "uid is required for MustRunAs")),
            Some(uid) if uid < 0 => {
                errors.push(FieldError::invalid(path.child("uid"), uid, "uid cannot be negative"));
            }
            Some(_) => {}
        },
        RunAsUserStrategyType::MustRunAsRange => match (options.uid_range_min, options.uid_range_max) {
            // Both unset: filled from the namespace allocation.
            (None, None) => {}
            (Some(min), Some(max)) => {
                if min < 0 || max < 0 {
                    errors.push(FieldError::invalid(
                        path.clone(),
                        (min, max),
                        "uid range bounds cannot be negative",
                    ));
                }
                if min > max {
                    errors.push(FieldError::invalid(
                        path.child("uidRangeMin"),
                        min,
                        "min value must be less than or equal to max",
                    ));
                }
            }
            (min, max) => errors.push(FieldError::invalid(
                path,
                (min, max),
                "uidRangeMin and uidRangeMax must be set together",
            )),
        },
        RunAsUserStrategyType::MustRunAsNonRoot | RunAsUserStrategyType::RunAsAny => {}
    }
    errors
}

fn validate_group_ranges(path: &FieldPath, options: &GroupStrategyOptions) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for (i, range) in options.ranges.iter().enumerate() {
        let range_path = path.child("ranges").index(i);
        if range.min < 0 {
            errors.push(FieldError::invalid(range_path.child("min"), range.min, "min cannot be negative"));
        }
        if range.max < 0 {
            errors.push(FieldError::invalid(range_path.child("max"), range.max, "max cannot be negative"));
        }
        if range.min > range.max {
            errors.push(FieldError::invalid(range_path, range, "min cannot be greater than max"));
        }
    }
    errors
}

fn validate_capabilities(policy: &SecurityPolicy) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let drops = &policy.required_drop_capabilities;

    for (field, list) in [
        ("defaultAddCapabilities", &policy.default_add_capabilities),
        ("allowedCapabilities", &policy.allowed_capabilities),
    ] {
        for (i, cap) in list.iter().enumerate() {
            if is_capability_wildcard(cap) {
                continue;
            }
            if drops.contains(cap) {
                errors.push(FieldError::invalid(
                    FieldPath::root(field).index(i),
                    cap,
                    format!("capability is listed in {field} and requiredDropCapabilities"),
                ));
            }
        }
    }

    let allow_all = policy.allowed_capabilities.iter().any(|c| is_capability_wildcard(c));
    if allow_all && !drops.is_empty() {
        errors.push(FieldError::invalid(
            FieldPath::root("requiredDropCapabilities"),
            drops,
            "required capabilities must be empty when all capabilities are allowed by a wildcard",
        ));
    }
    errors
}
