//! Per-field strategies.
//!
//! Each concern of a policy (UID, SELinux, groups, capabilities, seccomp,
//! sysctls) is a closed enum chosen once when a provider is built. Every
//! strategy can `generate` a default for an unset field and `validate` an
//! observed value, returning field violations rather than failing fast.

pub mod capabilities;
pub mod group;
pub mod seccomp;
pub mod selinux;
pub mod sysctl;
pub mod user;

pub use capabilities::CapabilitiesStrategy;
pub use group::GroupStrategy;
pub use seccomp::SeccompStrategy;
pub use selinux::SeLinuxStrategy;
pub use sysctl::SysctlStrategy;
pub use user::RunAsUserStrategy;

/// Errors from building a strategy out of policy options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// `MustRunAs` without a UID.
    #[error("MustRunAs requires a UID")]
    MissingUid,

    /// `MustRunAsRange` without both bounds.
    #[error("MustRunAsRange requires a UID range")]
    MissingUidRange,

    /// `MustRunAsRange` with `min > max`.
    #[error("invalid UID range: min {min} is greater than max {max}")]
    InvalidUidRange {
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },

    /// SELinux `MustRunAs` without options.
    #[error("MustRunAs requires SELinux options")]
    MissingSeLinuxOptions,

    /// A group `MustRunAs` strategy without ranges.
    #[error("{field} MustRunAs requires at least one range")]
    MissingGroupRanges {
        /// `fsGroup` or `supplementalGroups`.
        field: &'static str,
    },
}

/// Whether `capability` is the allow-everything wildcard (`*` or `ALL` in
/// any case).
pub fn is_capability_wildcard(capability: &str) -> bool {
    capability == "*" || capability.eq_ignore_ascii_case("ALL")
}
