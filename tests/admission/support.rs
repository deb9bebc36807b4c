//! Stores, policies and pods shared by the admission tests.

use std::sync::Arc;

use straylight::admission::Admission;
use straylight::config::AnnotationKeys;
use straylight::policy::PolicyMatcher;
use straylight::store::{MemoryStore, NamespaceStore};
use straylight::types::{
    Container, FsType, GroupStrategyType, Namespace, Pod, RunAsUserStrategyType,
    SeLinuxStrategyType, SecurityContext, SecurityPolicy, UserInfo,
};

pub const AUTHENTICATED: &str = "system:authenticated";

pub fn keys() -> AnnotationKeys {
    AnnotationKeys::default()
}

pub fn alice() -> UserInfo {
    UserInfo::new("alice", [AUTHENTICATED])
}

/// Restricted policy granted to every authenticated user.
pub fn restricted(name: &str) -> SecurityPolicy {
    let mut policy = SecurityPolicy {
        name: name.to_owned(),
        groups: vec![AUTHENTICATED.to_owned()],
        volumes: vec![FsType::EmptyDir, FsType::Secret, FsType::ConfigMap],
        ..SecurityPolicy::default()
    };
    policy.run_as_user.strategy = RunAsUserStrategyType::MustRunAsRange;
    policy.se_linux_context.strategy = SeLinuxStrategyType::MustRunAs;
    policy.fs_group.strategy = GroupStrategyType::MustRunAs;
    policy
}

/// Policy that allows everything, granted to every authenticated user.
pub fn anything(name: &str) -> SecurityPolicy {
    SecurityPolicy {
        name: name.to_owned(),
        groups: vec![AUTHENTICATED.to_owned()],
        allow_privileged_container: true,
        allow_host_network: true,
        allow_host_ports: true,
        allow_host_pid: true,
        allow_host_ipc: true,
        allowed_capabilities: vec!["*".to_owned()],
        volumes: vec![FsType::All],
        seccomp_profiles: vec!["*".to_owned()],
        ..SecurityPolicy::default()
    }
}

pub fn pod(namespace: &str) -> Pod {
    let mut pod = Pod {
        name: "web".to_owned(),
        namespace: namespace.to_owned(),
        ..Pod::default()
    };
    pod.spec.containers.push(Container {
        name: "main".to_owned(),
        image: "nginx".to_owned(),
        ..Container::default()
    });
    pod
}

pub fn privileged(mut pod: Pod) -> Pod {
    for container in &mut pod.spec.containers {
        container.security_context = Some(SecurityContext {
            privileged: Some(true),
            ..SecurityContext::default()
        });
    }
    pod
}

/// Admission over `policies` with namespace `tenant` allocated UIDs 1-3,
/// label `s0:c1,c0` and groups 2-4.
pub async fn admission(policies: Vec<SecurityPolicy>) -> Admission {
    let store = Arc::new(MemoryStore::new());
    let keys = keys();
    let mut ns = Namespace::new("tenant");
    ns.annotations.insert(keys.uid_range.clone(), "1/3".to_owned());
    ns.annotations.insert(keys.mcs.clone(), "s0:c1,c0".to_owned());
    ns.annotations.insert(keys.supplemental_groups.clone(), "2/3".to_owned());
    if let Err(err) = NamespaceStore::create(store.as_ref(), &ns).await {
        panic!("failed to seed namespace: {err}");
    }
    Admission::new(PolicyMatcher::new(policies), store as Arc<dyn NamespaceStore>, keys)
}
