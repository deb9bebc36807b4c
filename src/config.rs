//! Configuration loading.
//!
//! Everything lives in one `config.toml`; every section and key is optional
//! and falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mcs::{CategoryRange, McsError};
use crate::uid::{Range, RangeError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// UID/MCS allocation settings.
    #[serde(default)]
    pub allocation: AllocationConfig,

    /// Annotation keys written to namespaces and pods.
    #[serde(default)]
    pub annotations: AnnotationKeys,

    /// Persistence settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Where security policies are loaded from.
    #[serde(default)]
    pub policies: PoliciesConfig,
}

/// How allocations are coordinated between controller replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMode {
    /// Shared, versioned allocation record plus periodic repair.
    #[default]
    Shared,
    /// Pool held in process; only safe with a single controller.
    InProcess,
}

/// UID/MCS allocation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    /// UID range as `base-max/blockSize`.
    #[serde(default = "default_uid_range")]
    pub uid_range: String,

    /// MCS category range as `prefix/k[,n]`.
    #[serde(default = "default_mcs_range")]
    pub mcs_range: String,

    /// Labels skipped between consecutive namespaces.
    #[serde(default = "default_mcs_labels_per_project")]
    pub mcs_labels_per_project: u32,

    /// Coordination mode.
    #[serde(default)]
    pub mode: AllocationMode,

    /// Number of concurrent sync workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requeues of a failing namespace before it is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attempts at a conditional write before giving up.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Seconds between repair passes.
    #[serde(default = "default_repair_interval_secs")]
    pub repair_interval_secs: u64,

    /// Seconds between full namespace relists; 0 disables them.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Name of the shared allocation record.
    #[serde(default = "default_record_name")]
    pub record_name: String,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            uid_range: default_uid_range(),
            mcs_range: default_mcs_range(),
            mcs_labels_per_project: default_mcs_labels_per_project(),
            mode: AllocationMode::default(),
            workers: default_workers(),
            max_retries: default_max_retries(),
            conflict_retries: default_conflict_retries(),
            repair_interval_secs: default_repair_interval_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            record_name: default_record_name(),
        }
    }
}

impl AllocationConfig {
    /// Parsed UID range.
    ///
    /// # Errors
    ///
    /// Returns an error if `uid_range` is malformed.
    pub fn uid_range(&self) -> Result<Range, RangeError> {
        Range::parse(&self.uid_range)
    }

    /// Parsed MCS range.
    ///
    /// # Errors
    ///
    /// Returns an error if `mcs_range` is malformed.
    pub fn mcs_range(&self) -> Result<CategoryRange, McsError> {
        CategoryRange::parse(&self.mcs_range)
    }

    /// Interval between repair passes.
    pub fn repair_interval(&self) -> Duration {
        Duration::from_secs(self.repair_interval_secs)
    }

    /// Interval between namespace relists, if enabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

/// Annotation keys written to namespaces and pods.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnnotationKeys {
    /// Namespace annotation holding the UID block.
    #[serde(default = "default_uid_annotation")]
    pub uid_range: String,

    /// Namespace annotation holding the supplemental group blocks.
    #[serde(default = "default_supplemental_groups_annotation")]
    pub supplemental_groups: String,

    /// Namespace annotation holding the MCS label.
    #[serde(default = "default_mcs_annotation")]
    pub mcs: String,

    /// Pod annotation naming the policy that admitted it.
    #[serde(default = "default_validated_policy_annotation")]
    pub validated_policy: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            uid_range: default_uid_annotation(),
            supplemental_groups: default_supplemental_groups_annotation(),
            mcs: default_mcs_annotation(),
            validated_policy: default_validated_policy_annotation(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; defaults to `straylight.db` in the config dir.
    pub database: Option<PathBuf>,
}

/// Policy source settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoliciesConfig {
    /// Directory of `*.toml` policy files; defaults to `policies/` in the
    /// config dir.
    pub dir: Option<PathBuf>,
}

fn default_uid_range() -> String {
    "1000000000-1999999999/10000".to_owned()
}
fn default_mcs_range() -> String {
    "s0:/2".to_owned()
}
fn default_mcs_labels_per_project() -> u32 {
    5
}
fn default_workers() -> usize {
    1
}
fn default_max_retries() -> u32 {
    5
}
fn default_conflict_retries() -> u32 {
    5
}
fn default_repair_interval_secs() -> u64 {
    600
}
fn default_resync_interval_secs() -> u64 {
    30
}
fn default_record_name() -> String {
    "scc-uid".to_owned()
}
fn default_uid_annotation() -> String {
    "straylight.io/uid-range".to_owned()
}
fn default_supplemental_groups_annotation() -> String {
    "straylight.io/supplemental-groups".to_owned()
}
fn default_mcs_annotation() -> String {
    "straylight.io/mcs".to_owned()
}
fn default_validated_policy_annotation() -> String {
    "straylight.io/policy".to_owned()
}

/// Load and parse `config.toml` from the given path.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.straylight/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".straylight"))
}

/// Resolved on-disk locations.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root directory.
    pub root: PathBuf,
    /// `config.toml`.
    pub config_toml: PathBuf,
    /// SQLite database.
    pub database: PathBuf,
    /// Policy directory.
    pub policies_dir: PathBuf,
    /// Log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Paths under `root`, with overrides from `config` applied.
    pub fn resolve(root: &Path, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            config_toml: root.join("config.toml"),
            database: config
                .store
                .database
                .clone()
                .unwrap_or_else(|| root.join("straylight.db")),
            policies_dir: config
                .policies
                .dir
                .clone()
                .unwrap_or_else(|| root.join("policies")),
            logs_dir: root.join("logs"),
        }
    }
}
