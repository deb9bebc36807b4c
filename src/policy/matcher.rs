//! Finding the policies a requester may use.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::priority::sort_by_priority;
use crate::types::{SecurityPolicy, UserInfo};

/// Verb checked against the authorizer for policy use.
pub const USE_VERB: &str = "use";

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action is allowed.
    Allow,
    /// The action is denied.
    Deny,
    /// The authorizer has no rule for the action.
    NoOpinion,
}

/// What an authorizer is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Requesting identity.
    pub user: UserInfo,
    /// Action, always [`USE_VERB`] here.
    pub verb: String,
    /// Name of the policy.
    pub policy: String,
    /// Namespace the pod is created in.
    pub namespace: String,
}

/// An authorizer's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// The decision.
    pub decision: Decision,
    /// Free-form explanation.
    pub reason: String,
}

/// External authorization for policy use.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide on `request`.
    async fn authorize(&self, request: &AuthorizationRequest) -> Authorization;
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Whether `user` is named in the policy's users, or belongs to one of its
/// groups. Comparisons are exact.
pub fn policy_applies_to(policy: &SecurityPolicy, user: &UserInfo) -> bool {
    policy.users.iter().any(|u| *u == user.name)
        || user.groups.iter().any(|g| policy.groups.contains(g))
}

/// Policies `user` may use in `namespace`, in input order.
///
/// Listed users and groups are checked first; the authorizer is only asked
/// about the remaining policies.
pub async fn find_applicable_policies(
    policies: &[SecurityPolicy],
    user: &UserInfo,
    namespace: &str,
    authorizer: Option<&dyn Authorizer>,
) -> Vec<SecurityPolicy> {
    let mut matched = Vec::new();
    for policy in policies {
        if policy_applies_to(policy, user) {
            matched.push(policy.clone());
            continue;
        }
        let Some(authorizer) = authorizer else {
            continue;
        };
        let request = AuthorizationRequest {
            user: user.clone(),
            verb: USE_VERB.to_owned(),
            policy: policy.name.clone(),
            namespace: namespace.to_owned(),
        };
        let answer = authorizer.authorize(&request).await;
        if answer.decision == Decision::Allow {
            matched.push(policy.clone());
        } else {
            debug!(
                policy = %policy.name,
                user = %user.name,
                namespace,
                decision = ?answer.decision,
                reason = %answer.reason,
                "policy use not authorized"
            );
        }
    }
    matched
}

/// Drop later policies whose name was already seen, keeping order.
pub fn dedup_by_name(policies: Vec<SecurityPolicy>) -> Vec<SecurityPolicy> {
    let mut seen = HashSet::new();
    policies
        .into_iter()
        .filter(|p| seen.insert(p.name.clone()))
        .collect()
}

/// The loaded policies plus an optional authorizer.
#[derive(Clone)]
pub struct PolicyMatcher {
    policies: Vec<SecurityPolicy>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl std::fmt::Debug for PolicyMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyMatcher")
            .field("policies", &self.policies.len())
            .field("authorizer", &self.authorizer.is_some())
            .finish()
    }
}

impl PolicyMatcher {
    /// A matcher over `policies` with no authorizer.
    pub fn new(policies: Vec<SecurityPolicy>) -> Self {
        Self {
            policies,
            authorizer: None,
        }
    }

    /// Also grant policies `authorizer` allows.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Every loaded policy.
    pub fn policies(&self) -> &[SecurityPolicy] {
        &self.policies
    }

    /// Policies any of `users` may use in `namespace`, deduplicated and in
    /// the order they should be tried.
    pub async fn find(&self, users: &[UserInfo], namespace: &str) -> Vec<SecurityPolicy> {
        let mut matched = Vec::new();
        for user in users {
            matched.extend(
                find_applicable_policies(&self.policies, user, namespace, self.authorizer.as_deref())
                    .await,
            );
        }
        let mut matched = dedup_by_name(matched);
        sort_by_priority(&mut matched);
        matched
    }
}
