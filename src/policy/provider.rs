//! A policy's strategies composed into one mutate-then-validate engine.
//!
//! [`Provider::assign_security_context`] works on a copy of the pod: pod
//! defaults are generated and validated, then every init container and
//! container in turn. Only a pod with no violations is written back, so a
//! failed attempt leaves no trace of this policy's defaults.

use super::field::{FieldError, FieldPath};
use super::strategy::{
    CapabilitiesStrategy, GroupStrategy, RunAsUserStrategy, SeLinuxStrategy, SeccompStrategy,
    StrategyError, SysctlStrategy,
};
use crate::types::{
    Container, FsType, Pod, PodSecurityContext, SecurityContext, SecurityPolicy, VolumeSource,
};

/// Applies one [`SecurityPolicy`] to pods.
#[derive(Debug, Clone)]
pub struct Provider {
    policy: SecurityPolicy,
    run_as_user: RunAsUserStrategy,
    se_linux: SeLinuxStrategy,
    fs_group: GroupStrategy,
    supplemental_groups: GroupStrategy,
    capabilities: CapabilitiesStrategy,
    seccomp: SeccompStrategy,
    sysctls: SysctlStrategy,
}

impl Provider {
    /// Build the strategies of `policy`. The policy must already carry any
    /// namespace-allocated values it needs.
    ///
    /// # Errors
    ///
    /// Returns an error if a strategy is missing required options.
    pub fn new(policy: SecurityPolicy) -> Result<Self, StrategyError> {
        Ok(Self {
            run_as_user: RunAsUserStrategy::new(&policy.run_as_user)?,
            se_linux: SeLinuxStrategy::new(&policy.se_linux_context)?,
            fs_group: GroupStrategy::new("fsGroup", &policy.fs_group)?,
            supplemental_groups: GroupStrategy::new("supplementalGroups", &policy.supplemental_groups)?,
            capabilities: CapabilitiesStrategy::new(
                &policy.default_add_capabilities,
                &policy.required_drop_capabilities,
                &policy.allowed_capabilities,
            ),
            seccomp: SeccompStrategy::new(&policy.seccomp_profiles),
            sysctls: SysctlStrategy::new(policy.allowed_sysctls.as_deref()),
            policy,
        })
    }

    /// The policy this provider applies.
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        &self.policy.name
    }

    /// Default and validate every security context of `pod`.
    ///
    /// On success `pod` holds the resolved contexts. On failure it is left
    /// untouched and every violation found is returned.
    ///
    /// # Errors
    ///
    /// Returns all field violations across the pod and its containers.
    pub fn assign_security_context(&self, pod: &mut Pod, path: &FieldPath) -> Result<(), Vec<FieldError>> {
        let mut candidate = pod.clone();
        let mut errors = Vec::new();

        candidate.spec.security_context = Some(self.create_pod_security_context(&candidate));
        errors.extend(self.validate_pod_security_context(&candidate, path));

        for i in 0..candidate.spec.init_containers.len() {
            let container_path = path.child("initContainers").index(i);
            errors.extend(self.resolve_container(&mut candidate, i, true, &container_path));
        }
        for i in 0..candidate.spec.containers.len() {
            let container_path = path.child("containers").index(i);
            errors.extend(self.resolve_container(&mut candidate, i, false, &container_path));
        }

        if errors.is_empty() {
            *pod = candidate;
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn resolve_container(
        &self,
        pod: &mut Pod,
        index: usize,
        init: bool,
        path: &FieldPath,
    ) -> Vec<FieldError> {
        let list = if init { &pod.spec.init_containers } else { &pod.spec.containers };
        let Some(mut container) = list.get(index).cloned() else {
            return Vec::new();
        };
        container.security_context = Some(self.create_container_security_context(pod, &container));
        let errors = self.validate_container_security_context(pod, &container, path);

        let list = if init { &mut pod.spec.init_containers } else { &mut pod.spec.containers };
        if let Some(slot) = list.get_mut(index) {
            *slot = container;
        }
        errors
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Pod security context with this policy's defaults filled into unset
    /// fields.
    pub fn create_pod_security_context(&self, pod: &Pod) -> PodSecurityContext {
        let mut sc = pod.spec.security_context.clone().unwrap_or_default();
        if sc.supplemental_groups.is_empty() {
            sc.supplemental_groups = self.supplemental_groups.generate();
        }
        if sc.fs_group.is_none() {
            sc.fs_group = self.fs_group.generate_single();
        }
        if sc.se_linux_options.is_none() {
            sc.se_linux_options = self.se_linux.generate();
        }
        if sc.seccomp_profile.is_none() {
            sc.seccomp_profile = self.seccomp.generate();
        }
        sc
    }

    /// Security context for `container` with this policy's defaults filled
    /// into fields set neither on the container nor on the pod.
    pub fn create_container_security_context(&self, pod: &Pod, container: &Container) -> SecurityContext {
        let pod_sc = pod.spec.security_context.as_ref();
        let mut sc = container.security_context.clone().unwrap_or_default();

        let effective_uid = sc.run_as_user.or_else(|| pod_sc.and_then(|p| p.run_as_user));
        if effective_uid.is_none() {
            sc.run_as_user = self.run_as_user.generate();
        }
        if sc.se_linux_options.is_none() && pod_sc.and_then(|p| p.se_linux_options.as_ref()).is_none() {
            sc.se_linux_options = self.se_linux.generate();
        }

        sc.capabilities = self.capabilities.generate(sc.capabilities.as_ref());

        // Without a UID the kubelet can only enforce non-root if told to.
        let non_root = sc.run_as_non_root.or_else(|| pod_sc.and_then(|p| p.run_as_non_root));
        if self.run_as_user == RunAsUserStrategy::MustRunAsNonRoot
            && non_root.is_none()
            && effective_uid.is_none()
        {
            sc.run_as_non_root = Some(true);
        }

        if self.policy.read_only_root_filesystem && sc.read_only_root_filesystem.is_none() {
            sc.read_only_root_filesystem = Some(true);
        }
        sc
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check pod-level settings. `path` is the pod spec.
    pub fn validate_pod_security_context(&self, pod: &Pod, path: &FieldPath) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let empty = PodSecurityContext::default();
        let sc = pod.spec.security_context.as_ref().unwrap_or(&empty);
        let sc_path = path.child("securityContext");

        let fs_group: Vec<i64> = sc.fs_group.into_iter().collect();
        errors.extend(self.fs_group.validate(&sc_path.child("fsGroup"), &fs_group));
        errors.extend(
            self.supplemental_groups
                .validate(&sc_path.child("supplementalGroups"), &sc.supplemental_groups),
        );
        errors.extend(
            self.se_linux
                .validate(&sc_path.child("seLinuxOptions"), sc.se_linux_options.as_ref()),
        );
        errors.extend(
            self.seccomp
                .validate(&sc_path.child("seccompProfile"), sc.seccomp_profile.as_deref()),
        );
        errors.extend(self.sysctls.validate(&sc_path.child("sysctls"), &sc.sysctls));

        if !self.policy.allow_host_network && sc.host_network {
            errors.push(FieldError::invalid(
                sc_path.child("hostNetwork"),
                true,
                "Host network is not allowed to be used",
            ));
        }
        if !self.policy.allow_host_pid && sc.host_pid {
            errors.push(FieldError::invalid(
                sc_path.child("hostPID"),
                true,
                "Host PID is not allowed to be used",
            ));
        }
        if !self.policy.allow_host_ipc && sc.host_ipc {
            errors.push(FieldError::invalid(
                sc_path.child("hostIPC"),
                true,
                "Host IPC is not allowed to be used",
            ));
        }

        errors.extend(self.validate_volumes(pod, path));
        errors
    }

    fn validate_volumes(&self, pod: &Pod, path: &FieldPath) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let allow_all = self.policy.volumes.contains(&FsType::All);
        for (i, volume) in pod.spec.volumes.iter().enumerate() {
            let fs_type = volume.source.fs_type();
            let volume_path = path.child("volumes").index(i);
            if !allow_all && !self.policy.volumes.contains(&fs_type) {
                errors.push(FieldError::invalid(
                    volume_path.clone(),
                    fs_type.as_str(),
                    format!("{fs_type} volumes are not allowed to be used"),
                ));
                continue;
            }
            if let VolumeSource::FlexVolume { driver } = &volume.source {
                let allowed = &self.policy.allowed_flex_volumes;
                if !allowed.is_empty() && !allowed.contains(driver) {
                    errors.push(FieldError::invalid(
                        volume_path.child("driver"),
                        driver,
                        "Flexvolume driver is not allowed to be used",
                    ));
                }
            }
        }
        errors
    }

    /// Check the effective settings of `container`. `path` is the container.
    pub fn validate_container_security_context(
        &self,
        pod: &Pod,
        container: &Container,
        path: &FieldPath,
    ) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let pod_sc = pod.spec.security_context.as_ref();
        let empty = SecurityContext::default();
        let sc = container.security_context.as_ref().unwrap_or(&empty);
        let sc_path = path.child("securityContext");

        let run_as_user = sc.run_as_user.or_else(|| pod_sc.and_then(|p| p.run_as_user));
        let run_as_non_root = sc.run_as_non_root.or_else(|| pod_sc.and_then(|p| p.run_as_non_root));
        errors.extend(
            self.run_as_user
                .validate(&sc_path, &container.name, run_as_non_root, run_as_user),
        );

        let se_linux = sc
            .se_linux_options
            .as_ref()
            .or_else(|| pod_sc.and_then(|p| p.se_linux_options.as_ref()));
        errors.extend(self.se_linux.validate(&sc_path.child("seLinuxOptions"), se_linux));

        let seccomp = sc
            .seccomp_profile
            .as_deref()
            .or_else(|| pod_sc.and_then(|p| p.seccomp_profile.as_deref()));
        errors.extend(self.seccomp.validate(&sc_path.child("seccompProfile"), seccomp));

        if !self.policy.allow_privileged_container && sc.privileged == Some(true) {
            errors.push(FieldError::invalid(
                sc_path.child("privileged"),
                true,
                "Privileged containers are not allowed",
            ));
        }

        errors.extend(
            self.capabilities
                .validate(&sc_path.child("capabilities"), sc.capabilities.as_ref()),
        );

        if !self.policy.allow_host_ports {
            for (i, port) in container.ports.iter().enumerate() {
                if let Some(host_port) = port.host_port.filter(|p| *p != 0) {
                    errors.push(FieldError::invalid(
                        path.child("ports").index(i).child("hostPort"),
                        host_port,
                        "Host ports are not allowed to be used",
                    ));
                }
            }
        }

        if self.policy.read_only_root_filesystem {
            let field = sc_path.child("readOnlyRootFilesystem");
            match sc.read_only_root_filesystem {
                None => errors.push(FieldError::invalid(
                    field,
                    "nil",
                    "ReadOnlyRootFilesystem may not be nil and must be set to true",
                )),
                Some(false) => errors.push(FieldError::invalid(
                    field,
                    false,
                    "ReadOnlyRootFilesystem must be set to true",
                )),
                Some(true) => {}
            }
        }
        errors
    }
}
