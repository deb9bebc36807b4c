//! Policy restrictiveness scoring and ordering.
//!
//! A lower score means a more restrictive policy. Policies are tried in
//! order of explicit priority (highest first, unset counts as zero), then
//! score (lowest first), then name.

use std::cmp::Ordering;

use super::strategy::is_capability_wildcard;
use crate::types::{FsType, RunAsUserStrategyType, SeLinuxStrategyType, SecurityPolicy};

/// Penalty for allowing privileged containers.
pub const PRIVILEGED_SCORE: u32 = 1_000_000;
/// Penalty for allowing host paths or every volume type.
pub const HOST_VOLUME_SCORE: u32 = 2_000_000;
/// Penalty for allowing any other non-trivial volume type.
pub const NON_TRIVIAL_VOLUME_SCORE: u32 = 50_000;

/// SELinux `RunAsAny`.
pub const SELINUX_RUN_AS_ANY_SCORE: u32 = 40_000;
/// SELinux `MustRunAs`.
pub const SELINUX_MUST_RUN_AS_SCORE: u32 = 10_000;

/// RunAsUser `RunAsAny`.
pub const USER_RUN_AS_ANY_SCORE: u32 = 40_000;
/// RunAsUser `MustRunAsNonRoot`.
pub const USER_NON_ROOT_SCORE: u32 = 30_000;
/// RunAsUser `MustRunAsRange`.
pub const USER_RANGE_SCORE: u32 = 20_000;
/// RunAsUser `MustRunAs`.
pub const USER_MUST_RUN_AS_SCORE: u32 = 10_000;

const CAPABILITY_BASE: i64 = 5_000;
const CAPABILITY_DEFAULT_ADD: i64 = 300;
const CAPABILITY_ALLOWED: i64 = 10;
const CAPABILITY_ALLOW_ALL: i64 = 4_000;
const CAPABILITY_DROPPED: i64 = -50;
const CAPABILITY_DROP_ALL: i64 = -3_000;
const CAPABILITY_MAX: i64 = 9_999;

/// Volume types that expose nothing beyond the pod's own data.
const TRIVIAL_VOLUMES: &[FsType] = &[
    FsType::Secret,
    FsType::ConfigMap,
    FsType::EmptyDir,
    FsType::DownwardApi,
    FsType::Projected,
    FsType::None,
];

/// Restrictiveness score of `policy`.
pub fn score(policy: &SecurityPolicy) -> u32 {
    let mut total: u32 = 0;
    if policy.allow_privileged_container {
        total = total.saturating_add(PRIVILEGED_SCORE);
    }
    total = total.saturating_add(volume_score(&policy.volumes));
    total = total.saturating_add(match policy.se_linux_context.strategy {
        SeLinuxStrategyType::RunAsAny => SELINUX_RUN_AS_ANY_SCORE,
        SeLinuxStrategyType::MustRunAs => SELINUX_MUST_RUN_AS_SCORE,
    });
    total = total.saturating_add(match policy.run_as_user.strategy {
        RunAsUserStrategyType::RunAsAny => USER_RUN_AS_ANY_SCORE,
        RunAsUserStrategyType::MustRunAsNonRoot => USER_NON_ROOT_SCORE,
        RunAsUserStrategyType::MustRunAsRange => USER_RANGE_SCORE,
        RunAsUserStrategyType::MustRunAs => USER_MUST_RUN_AS_SCORE,
    });
    total.saturating_add(capability_score(policy))
}

fn volume_score(volumes: &[FsType]) -> u32 {
    if volumes.iter().any(|v| matches!(v, FsType::HostPath | FsType::All)) {
        return HOST_VOLUME_SCORE;
    }
    if volumes.iter().any(|v| !TRIVIAL_VOLUMES.contains(v)) {
        return NON_TRIVIAL_VOLUME_SCORE;
    }
    0
}

fn capability_score(policy: &SecurityPolicy) -> u32 {
    let mut score = CAPABILITY_BASE;

    let named = |caps: &[String]| {
        let count = caps.iter().filter(|c| !is_capability_wildcard(c)).count();
        i64::try_from(count).unwrap_or(i64::MAX)
    };
    score = score.saturating_add(
        named(policy.default_add_capabilities.as_slice()).saturating_mul(CAPABILITY_DEFAULT_ADD),
    );
    score = score
        .saturating_add(named(policy.allowed_capabilities.as_slice()).saturating_mul(CAPABILITY_ALLOWED));
    if policy.allowed_capabilities.iter().any(|c| is_capability_wildcard(c)) {
        score = score.saturating_add(CAPABILITY_ALLOW_ALL);
    }

    let drops = &policy.required_drop_capabilities;
    if drops.iter().any(|c| c.eq_ignore_ascii_case("ALL")) {
        score = score.saturating_add(CAPABILITY_DROP_ALL);
    } else {
        let dropped = i64::try_from(drops.len()).unwrap_or(i64::MAX);
        score = score.saturating_add(dropped.saturating_mul(CAPABILITY_DROPPED));
    }

    u32::try_from(score.clamp(0, CAPABILITY_MAX)).unwrap_or(0)
}

/// Order in which two policies are tried.
pub fn compare(a: &SecurityPolicy, b: &SecurityPolicy) -> Ordering {
    let priority_a = a.priority.unwrap_or(0);
    let priority_b = b.priority.unwrap_or(0);
    priority_b
        .cmp(&priority_a)
        .then_with(|| score(a).cmp(&score(b)))
        .then_with(|| a.name.cmp(&b.name))
}

/// Sort `policies` into the order they are tried.
pub fn sort_by_priority(policies: &mut [SecurityPolicy]) {
    policies.sort_by(compare);
}
