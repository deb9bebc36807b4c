//! Pod admission against security policies.
//!
//! [`Admission::admit`] finds the policies the requester and the pod's
//! service account may use, tries them most restrictive first and keeps the
//! first one the pod satisfies. [`Admission::review`] answers the same
//! question without touching the caller's pod.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AnnotationKeys;
use crate::policy::field::{aggregate, FieldError, FieldPath};
use crate::policy::{create_provider, PolicyMatcher, Provider};
use crate::store::{NamespaceStore, StoreError};
use crate::types::{Namespace, Pod, PodSpec, UserInfo};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a pod was not admitted.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// No usable policy applies to the requester.
    #[error("no providers available to validate pod request")]
    NoProviders,

    /// Every applicable policy rejected the pod.
    #[error("unable to validate against any security context constraint: {reasons}")]
    Forbidden {
        /// Violations per policy.
        reasons: String,
    },

    /// The pod spec is structurally invalid.
    #[error("invalid pod spec: {0}")]
    Invalid(String),

    /// The namespace could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Review types
// ---------------------------------------------------------------------------

/// Structural validation of a pod spec, run before policies on review.
pub trait PodSpecValidator: Send + Sync {
    /// Problems with `spec`; empty when it is well formed.
    fn validate(&self, spec: &PodSpec, path: &FieldPath) -> Vec<FieldError>;
}

/// Basic shape checks: at least one container, and non-empty, unique
/// container and volume names.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl PodSpecValidator for StructuralValidator {
    fn validate(&self, spec: &PodSpec, path: &FieldPath) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if spec.containers.is_empty() {
            errors.push(FieldError::required(path.child("containers"), "at least one container is required"));
        }

        let mut names = HashSet::new();
        let containers = spec
            .init_containers
            .iter()
            .enumerate()
            .map(|(i, c)| (path.child("initContainers").index(i), c))
            .chain(
                spec.containers
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (path.child("containers").index(i), c)),
            );
        for (container_path, container) in containers {
            if container.name.is_empty() {
                errors.push(FieldError::required(container_path.child("name"), ""));
            } else if !names.insert(container.name.as_str()) {
                errors.push(FieldError::invalid(container_path.child("name"), &container.name, "duplicate container name"));
            }
        }

        let mut volumes = HashSet::new();
        for (i, volume) in spec.volumes.iter().enumerate() {
            let volume_path = path.child("volumes").index(i).child("name");
            if volume.name.is_empty() {
                errors.push(FieldError::required(volume_path, ""));
            } else if !volumes.insert(volume.name.as_str()) {
                errors.push(FieldError::invalid(volume_path, &volume.name, "duplicate volume name"));
            }
        }
        errors
    }
}

/// Which policy, if any, would admit a pod for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    /// Pod to check.
    pub pod: Pod,
    /// Requesting user.
    pub user: UserInfo,
}

/// Outcome of a review.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    /// Name of the admitting policy.
    pub allowed_by: Option<String>,
    /// The pod as it would be admitted.
    pub pod: Option<Pod>,
    /// Why no policy admitted the pod.
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Admits pods against the loaded policies.
pub struct Admission {
    matcher: PolicyMatcher,
    namespaces: Arc<dyn NamespaceStore>,
    keys: AnnotationKeys,
    validator: Arc<dyn PodSpecValidator>,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl Admission {
    /// Admission over `matcher`'s policies, reading allocations from
    /// `namespaces`.
    pub fn new(matcher: PolicyMatcher, namespaces: Arc<dyn NamespaceStore>, keys: AnnotationKeys) -> Self {
        Self {
            matcher,
            namespaces,
            keys,
            validator: Arc::new(StructuralValidator),
        }
    }

    /// Use `validator` for review requests.
    pub fn with_validator(mut self, validator: Arc<dyn PodSpecValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Apply the first policy `pod` satisfies and record it on the pod.
    ///
    /// Returns the admitting policy's name. On error `pod` is unchanged.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::NoProviders`] when no policy applies,
    /// [`AdmissionError::Forbidden`] when every applicable policy rejects the
    /// pod, and store errors.
    pub async fn admit(&self, pod: &mut Pod, user: &UserInfo) -> Result<String, AdmissionError> {
        let providers = self.providers_for(pod, user).await?;
        if providers.is_empty() {
            return Err(AdmissionError::NoProviders);
        }

        let path = FieldPath::root("spec");
        let mut reasons = Vec::new();
        for provider in &providers {
            match provider.assign_security_context(pod, &path) {
                Ok(()) => {
                    pod.annotations
                        .insert(self.keys.validated_policy.clone(), provider.name().to_owned());
                    info!(pod = %pod.name, namespace = %pod.namespace, policy = %provider.name(), "pod admitted");
                    return Ok(provider.name().to_owned());
                }
                Err(errors) => {
                    let rendered = aggregate(&errors);
                    debug!(pod = %pod.name, policy = %provider.name(), errors = %rendered, "policy rejected pod");
                    reasons.push(format!("provider {}: {rendered}", provider.name()));
                }
            }
        }

        Err(AdmissionError::Forbidden {
            reasons: reasons.join("; "),
        })
    }

    /// Which policy would admit `request.pod` for `request.user`, and the
    /// pod it would produce.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Invalid`] if the spec fails structural validation,
    /// and store errors. A pod no policy admits is not an error.
    pub async fn review(&self, request: &ReviewRequest) -> Result<ReviewResponse, AdmissionError> {
        let errors = self.validator.validate(&request.pod.spec, &FieldPath::root("spec"));
        if !errors.is_empty() {
            return Err(AdmissionError::Invalid(aggregate(&errors)));
        }

        let mut pod = request.pod.clone();
        match self.admit(&mut pod, &request.user).await {
            Ok(policy) => Ok(ReviewResponse {
                allowed_by: Some(policy),
                pod: Some(pod),
                reason: None,
            }),
            Err(e @ (AdmissionError::NoProviders | AdmissionError::Forbidden { .. })) => Ok(ReviewResponse {
                reason: Some(e.to_string()),
                ..ReviewResponse::default()
            }),
            Err(e) => Err(e),
        }
    }

    /// Providers for every policy `user` or the pod's service account may
    /// use, in the order they are tried. Policies whose provider cannot be
    /// built are skipped.
    async fn providers_for(&self, pod: &Pod, user: &UserInfo) -> Result<Vec<Provider>, AdmissionError> {
        let mut users = vec![user.clone()];
        if !pod.spec.service_account_name.is_empty() {
            users.push(UserInfo::service_account(&pod.namespace, &pod.spec.service_account_name));
        }
        let policies = self.matcher.find(&users, &pod.namespace).await;

        let namespace = self.namespace(&pod.namespace).await?;
        let mut providers = Vec::with_capacity(policies.len());
        for policy in &policies {
            match create_provider(policy, namespace.as_ref(), &self.keys) {
                Ok(provider) => providers.push(provider),
                Err(e) => debug!(policy = %policy.name, error = %e, "skipping policy"),
            }
        }
        Ok(providers)
    }

    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, AdmissionError> {
        match self.namespaces.get(name).await {
            Ok(namespace) => Ok(Some(namespace)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
