//! API objects shared by the allocator, the policy engine and admission.
//!
//! Field names follow the cluster API's camelCase wire form so that pods and
//! policies can be loaded from JSON or TOML documents unchanged.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form key/value metadata attached to objects.
pub type Annotations = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Namespaces and the shared allocation record
// ---------------------------------------------------------------------------

/// A tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Namespace {
    /// Unique namespace name.
    pub name: String,
    /// Annotations, including the allocated security ranges.
    pub annotations: Annotations,
    /// Version for optimistic concurrency; bumped by every successful write.
    pub resource_version: u64,
}

impl Namespace {
    /// A fresh namespace with no annotations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Value of annotation `key`, if set.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// The persisted state of a shared allocation pool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RangeAllocation {
    /// Record name.
    pub name: String,
    /// Canonical string of the range the bitmap covers.
    pub range: String,
    /// Minimal big-endian bitmap bytes.
    pub data: Vec<u8>,
    /// Version for optimistic concurrency.
    pub resource_version: u64,
    /// Time of the last successful write, set by the store.
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// An authenticated requester.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    /// User name.
    pub name: String,
    /// Groups the user belongs to.
    pub groups: Vec<String>,
}

impl UserInfo {
    /// A user with the given name and groups.
    pub fn new(name: impl Into<String>, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    /// The identity a pod's service account runs as.
    pub fn service_account(namespace: &str, service_account: &str) -> Self {
        Self {
            name: format!("system:serviceaccount:{namespace}:{service_account}"),
            groups: vec![
                "system:serviceaccounts".to_owned(),
                format!("system:serviceaccounts:{namespace}"),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Security contexts
// ---------------------------------------------------------------------------

/// An inclusive ID interval used by group and user strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRange {
    /// Lowest allowed ID.
    pub min: i64,
    /// Highest allowed ID.
    pub max: i64,
}

impl IdRange {
    /// Whether `id` lies within the interval.
    pub fn contains(&self, id: i64) -> bool {
        id >= self.min && id <= self.max
    }
}

/// SELinux labelling options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeLinuxOptions {
    /// SELinux user.
    pub user: String,
    /// SELinux role.
    pub role: String,
    /// SELinux type.
    #[serde(rename = "type")]
    pub type_: String,
    /// MCS level, e.g. `s0:c1,c0`.
    pub level: String,
}

/// Capabilities added to and dropped from a container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Capabilities to add.
    pub add: Vec<String>,
    /// Capabilities to drop.
    pub drop: Vec<String>,
}

/// A kernel parameter set for the pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sysctl {
    /// Parameter name, e.g. `kernel.shm_rmid_forced`.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// Pod-wide security settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodSecurityContext {
    /// Use the host's network namespace.
    pub host_network: bool,
    /// Use the host's PID namespace.
    #[serde(rename = "hostPID")]
    pub host_pid: bool,
    /// Use the host's IPC namespace.
    #[serde(rename = "hostIPC")]
    pub host_ipc: bool,
    /// Default UID for containers that do not set one.
    pub run_as_user: Option<i64>,
    /// Default non-root requirement for containers.
    pub run_as_non_root: Option<bool>,
    /// Default SELinux options for containers.
    pub se_linux_options: Option<SeLinuxOptions>,
    /// Supplemental groups for every container process.
    pub supplemental_groups: Vec<i64>,
    /// Group that owns pod volumes.
    pub fs_group: Option<i64>,
    /// Seccomp profile for the pod.
    pub seccomp_profile: Option<String>,
    /// Kernel parameters.
    pub sysctls: Vec<Sysctl>,
}

/// Per-container security settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityContext {
    /// Capabilities to add and drop.
    pub capabilities: Option<Capabilities>,
    /// Run in privileged mode.
    pub privileged: Option<bool>,
    /// SELinux options, overriding the pod's.
    pub se_linux_options: Option<SeLinuxOptions>,
    /// UID to run as, overriding the pod's.
    pub run_as_user: Option<i64>,
    /// Require a non-root UID.
    pub run_as_non_root: Option<bool>,
    /// Mount the root filesystem read-only.
    pub read_only_root_filesystem: Option<bool>,
    /// Seccomp profile, overriding the pod's.
    pub seccomp_profile: Option<String>,
}

// ---------------------------------------------------------------------------
// Pods
// ---------------------------------------------------------------------------

/// A port exposed by a container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port inside the container.
    pub container_port: i32,
    /// Port bound on the host, if any.
    pub host_port: Option<i32>,
}

/// A container in a pod.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Container {
    /// Container name, unique within the pod.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Exposed ports.
    pub ports: Vec<ContainerPort>,
    /// Security settings.
    pub security_context: Option<SecurityContext>,
}

/// Volume plugin kinds a policy can allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FsType {
    /// Every volume type.
    #[serde(rename = "*")]
    All,
    /// No volumes at all.
    #[serde(rename = "none")]
    None,
    /// Host path.
    #[serde(rename = "hostPath")]
    HostPath,
    /// Empty dir.
    #[serde(rename = "emptyDir")]
    EmptyDir,
    /// GCE persistent disk.
    #[serde(rename = "gcePersistentDisk")]
    GcePersistentDisk,
    /// AWS EBS volume.
    #[serde(rename = "awsElasticBlockStore")]
    AwsElasticBlockStore,
    /// Git repository.
    #[serde(rename = "gitRepo")]
    GitRepo,
    /// Secret.
    #[serde(rename = "secret")]
    Secret,
    /// NFS export.
    #[serde(rename = "nfs")]
    Nfs,
    /// iSCSI target.
    #[serde(rename = "iscsi")]
    Iscsi,
    /// GlusterFS volume.
    #[serde(rename = "glusterfs")]
    Glusterfs,
    /// Persistent volume claim.
    #[serde(rename = "persistentVolumeClaim")]
    PersistentVolumeClaim,
    /// Ceph RBD.
    #[serde(rename = "rbd")]
    Rbd,
    /// Cinder volume.
    #[serde(rename = "cinder")]
    Cinder,
    /// CephFS.
    #[serde(rename = "cephFS")]
    CephFs,
    /// Downward API.
    #[serde(rename = "downwardAPI")]
    DownwardApi,
    /// Fibre channel.
    #[serde(rename = "fc")]
    Fc,
    /// Azure file share.
    #[serde(rename = "azureFile")]
    AzureFile,
    /// Config map.
    #[serde(rename = "configMap")]
    ConfigMap,
    /// Azure disk.
    #[serde(rename = "azureDisk")]
    AzureDisk,
    /// Projected volume.
    #[serde(rename = "projected")]
    Projected,
    /// Flex volume driver.
    #[serde(rename = "flexVolume")]
    FlexVolume,
    /// CSI inline volume.
    #[serde(rename = "csi")]
    Csi,
    /// Generic ephemeral volume.
    #[serde(rename = "ephemeral")]
    Ephemeral,
}

impl FsType {
    /// Wire name of the volume type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "*",
            Self::None => "none",
            Self::HostPath => "hostPath",
            Self::EmptyDir => "emptyDir",
            Self::GcePersistentDisk => "gcePersistentDisk",
            Self::AwsElasticBlockStore => "awsElasticBlockStore",
            Self::GitRepo => "gitRepo",
            Self::Secret => "secret",
            Self::Nfs => "nfs",
            Self::Iscsi => "iscsi",
            Self::Glusterfs => "glusterfs",
            Self::PersistentVolumeClaim => "persistentVolumeClaim",
            Self::Rbd => "rbd",
            Self::Cinder => "cinder",
            Self::CephFs => "cephFS",
            Self::DownwardApi => "downwardAPI",
            Self::Fc => "fc",
            Self::AzureFile => "azureFile",
            Self::ConfigMap => "configMap",
            Self::AzureDisk => "azureDisk",
            Self::Projected => "projected",
            Self::FlexVolume => "flexVolume",
            Self::Csi => "csi",
            Self::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a volume's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)] // variants mirror FsType
pub enum VolumeSource {
    HostPath {
        /// Path on the host.
        path: String,
    },
    EmptyDir {},
    GcePersistentDisk {},
    AwsElasticBlockStore {},
    GitRepo {},
    Secret {},
    Nfs {},
    Iscsi {},
    Glusterfs {},
    PersistentVolumeClaim {},
    Rbd {},
    Cinder {},
    #[serde(rename = "cephFS")]
    CephFs {},
    #[serde(rename = "downwardAPI")]
    DownwardApi {},
    Fc {},
    AzureFile {},
    ConfigMap {},
    AzureDisk {},
    Projected {},
    FlexVolume {
        /// Name of the flex driver.
        driver: String,
    },
    Csi {
        /// Name of the CSI driver.
        driver: String,
    },
    Ephemeral {},
}

impl VolumeSource {
    /// The volume plugin kind.
    pub fn fs_type(&self) -> FsType {
        match self {
            Self::HostPath { .. } => FsType::HostPath,
            Self::EmptyDir {} => FsType::EmptyDir,
            Self::GcePersistentDisk {} => FsType::GcePersistentDisk,
            Self::AwsElasticBlockStore {} => FsType::AwsElasticBlockStore,
            Self::GitRepo {} => FsType::GitRepo,
            Self::Secret {} => FsType::Secret,
            Self::Nfs {} => FsType::Nfs,
            Self::Iscsi {} => FsType::Iscsi,
            Self::Glusterfs {} => FsType::Glusterfs,
            Self::PersistentVolumeClaim {} => FsType::PersistentVolumeClaim,
            Self::Rbd {} => FsType::Rbd,
            Self::Cinder {} => FsType::Cinder,
            Self::CephFs {} => FsType::CephFs,
            Self::DownwardApi {} => FsType::DownwardApi,
            Self::Fc {} => FsType::Fc,
            Self::AzureFile {} => FsType::AzureFile,
            Self::ConfigMap {} => FsType::ConfigMap,
            Self::AzureDisk {} => FsType::AzureDisk,
            Self::Projected {} => FsType::Projected,
            Self::FlexVolume { .. } => FsType::FlexVolume,
            Self::Csi { .. } => FsType::Csi,
            Self::Ephemeral {} => FsType::Ephemeral,
        }
    }
}

/// A named volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name, unique within the pod.
    pub name: String,
    /// Volume source.
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// The workload part of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodSpec {
    /// Service account the pod runs as.
    pub service_account_name: String,
    /// Pod-wide security settings.
    pub security_context: Option<PodSecurityContext>,
    /// Containers run to completion before the main containers start.
    pub init_containers: Vec<Container>,
    /// Main containers.
    pub containers: Vec<Container>,
    /// Volumes available to containers.
    pub volumes: Vec<Volume>,
}

/// A pod submitted for admission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pod {
    /// Pod name.
    pub name: String,
    /// Namespace the pod is created in.
    pub namespace: String,
    /// Pod annotations.
    pub annotations: Annotations,
    /// Pod spec.
    pub spec: PodSpec,
}

// ---------------------------------------------------------------------------
// Security policies
// ---------------------------------------------------------------------------

/// How the container UID is chosen and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunAsUserStrategyType {
    /// Exactly one UID.
    MustRunAs,
    /// Any UID in a range.
    MustRunAsRange,
    /// Any non-zero UID.
    MustRunAsNonRoot,
    /// No restriction.
    #[default]
    RunAsAny,
}

/// How SELinux options are chosen and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SeLinuxStrategyType {
    /// Exactly the configured options.
    MustRunAs,
    /// No restriction.
    #[default]
    RunAsAny,
}

/// How FS and supplemental groups are chosen and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupStrategyType {
    /// Groups must fall within the configured ranges.
    MustRunAs,
    /// No restriction.
    #[default]
    RunAsAny,
}

/// RunAsUser strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunAsUserStrategyOptions {
    /// Strategy kind.
    #[serde(rename = "type")]
    pub strategy: RunAsUserStrategyType,
    /// UID for `MustRunAs`.
    pub uid: Option<i64>,
    /// Lower bound for `MustRunAsRange`.
    pub uid_range_min: Option<i64>,
    /// Upper bound for `MustRunAsRange`.
    pub uid_range_max: Option<i64>,
}

/// SELinux strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeLinuxStrategyOptions {
    /// Strategy kind.
    #[serde(rename = "type")]
    pub strategy: SeLinuxStrategyType,
    /// Options for `MustRunAs`.
    pub se_linux_options: Option<SeLinuxOptions>,
}

/// FS or supplemental group strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupStrategyOptions {
    /// Strategy kind.
    #[serde(rename = "type")]
    pub strategy: GroupStrategyType,
    /// Allowed ranges for `MustRunAs`.
    pub ranges: Vec<IdRange>,
}

/// A named bundle of security constraints and the identities it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityPolicy {
    /// Unique policy name.
    pub name: String,
    /// Explicit priority; higher is tried first.
    pub priority: Option<i32>,
    /// Allow privileged containers.
    pub allow_privileged_container: bool,
    /// Capabilities added to every container.
    pub default_add_capabilities: Vec<String>,
    /// Capabilities every container must drop.
    pub required_drop_capabilities: Vec<String>,
    /// Capabilities containers may add; `*` or `ALL` allows any.
    pub allowed_capabilities: Vec<String>,
    /// Allowed volume types.
    pub volumes: Vec<FsType>,
    /// Allowed flex volume drivers; empty allows any.
    pub allowed_flex_volumes: Vec<String>,
    /// Allow the host network namespace.
    pub allow_host_network: bool,
    /// Allow host ports.
    pub allow_host_ports: bool,
    /// Allow the host PID namespace.
    #[serde(rename = "allowHostPID")]
    pub allow_host_pid: bool,
    /// Allow the host IPC namespace.
    #[serde(rename = "allowHostIPC")]
    pub allow_host_ipc: bool,
    /// Require a read-only root filesystem.
    pub read_only_root_filesystem: bool,
    /// SELinux strategy.
    pub se_linux_context: SeLinuxStrategyOptions,
    /// RunAsUser strategy.
    pub run_as_user: RunAsUserStrategyOptions,
    /// FSGroup strategy.
    pub fs_group: GroupStrategyOptions,
    /// SupplementalGroups strategy.
    pub supplemental_groups: GroupStrategyOptions,
    /// Allowed seccomp profiles; `*` allows any.
    pub seccomp_profiles: Vec<String>,
    /// Allowed sysctl patterns; absent allows any, empty allows none.
    pub allowed_sysctls: Option<Vec<String>>,
    /// User names the policy applies to.
    pub users: Vec<String>,
    /// Groups the policy applies to.
    pub groups: Vec<String>,
}
