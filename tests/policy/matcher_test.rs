//! Tests for matching requesters to policies and ordering them.

use std::sync::Arc;

use async_trait::async_trait;
use straylight::policy::matcher::{
    dedup_by_name, find_applicable_policies, policy_applies_to, Authorization,
    AuthorizationRequest, Decision, USE_VERB,
};
use straylight::policy::priority::{score, sort_by_priority};
use straylight::policy::{Authorizer, PolicyMatcher};
use straylight::types::{
    FsType, RunAsUserStrategyType, SeLinuxStrategyType, SecurityPolicy, UserInfo,
};

use crate::fixtures::{permissive, restricted};

fn for_users(mut policy: SecurityPolicy, users: &[&str], groups: &[&str]) -> SecurityPolicy {
    policy.users = users.iter().map(|u| (*u).to_owned()).collect();
    policy.groups = groups.iter().map(|g| (*g).to_owned()).collect();
    policy
}

fn names(policies: &[SecurityPolicy]) -> Vec<&str> {
    policies.iter().map(|p| p.name.as_str()).collect()
}

#[test]
fn users_and_groups_match_exactly() {
    let policy = for_users(restricted("r"), &["alice"], &["dev"]);
    assert!(policy_applies_to(&policy, &UserInfo::new("alice", Vec::<String>::new())));
    assert!(policy_applies_to(&policy, &UserInfo::new("bob", ["dev"])));
    assert!(!policy_applies_to(&policy, &UserInfo::new("Alice", ["Dev"])));
}

#[test]
fn priority_beats_score_and_name_breaks_ties() {
    let mut restrictive = restricted("restrictive");
    restrictive.priority = Some(100);

    let mut must_run_as = permissive("matchingPrioritySCCOne");
    must_run_as.priority = Some(5);
    must_run_as.run_as_user.strategy = RunAsUserStrategyType::MustRunAs;
    must_run_as.run_as_user.uid = Some(1);

    let mut must_run_as_range = permissive("matchingPrioritySCCTwo");
    must_run_as_range.priority = Some(5);
    must_run_as_range.run_as_user.strategy = RunAsUserStrategyType::MustRunAsRange;

    let mut same_one = permissive("matchingPriorityAndScoreSCCOne");
    same_one.priority = Some(1);
    let mut same_two = permissive("matchingPriorityAndScoreSCCTwo");
    same_two.priority = Some(1);

    let mut policies = vec![same_two, must_run_as_range, restrictive, same_one, must_run_as];
    sort_by_priority(&mut policies);
    assert_eq!(
        names(&policies),
        vec![
            "restrictive",
            "matchingPrioritySCCOne",
            "matchingPrioritySCCTwo",
            "matchingPriorityAndScoreSCCOne",
            "matchingPriorityAndScoreSCCTwo",
        ]
    );
}

#[test]
fn unset_priority_sorts_as_zero() {
    let mut negative = restricted("negative");
    negative.priority = Some(-1);
    let unset = permissive("unset");
    let mut policies = vec![negative, unset];
    sort_by_priority(&mut policies);
    assert_eq!(names(&policies), vec!["unset", "negative"]);
}

#[test]
fn restrictive_policies_score_lower() {
    let restricted = restricted("restricted");
    let permissive = permissive("anything");
    assert!(score(&restricted) < score(&permissive));

    let mut host_path = restricted.clone();
    host_path.volumes.push(FsType::HostPath);
    assert!(score(&host_path) > score(&restricted));

    let mut selinux_any = restricted.clone();
    selinux_any.se_linux_context.strategy = SeLinuxStrategyType::RunAsAny;
    assert!(score(&selinux_any) > score(&restricted));

    let mut drops_all = restricted.clone();
    drops_all.required_drop_capabilities = vec!["ALL".to_owned()];
    assert!(score(&drops_all) < score(&restricted));
}

#[test]
fn duplicates_keep_the_first_occurrence() {
    let mut second = restricted("a");
    second.priority = Some(9);
    let deduped = dedup_by_name(vec![restricted("a"), permissive("b"), second]);
    assert_eq!(names(&deduped), vec!["a", "b"]);
    assert_eq!(deduped.first().and_then(|p| p.priority), None);
}

/// Allows only policies named in `allowed`, and only in namespace `ns`.
struct ListAuthorizer {
    allowed: Vec<String>,
    ns: String,
}

#[async_trait]
impl Authorizer for ListAuthorizer {
    async fn authorize(&self, request: &AuthorizationRequest) -> Authorization {
        assert_eq!(request.verb, USE_VERB);
        let decision = if request.namespace == self.ns && self.allowed.contains(&request.policy) {
            Decision::Allow
        } else {
            Decision::NoOpinion
        };
        Authorization {
            decision,
            reason: String::new(),
        }
    }
}

#[tokio::test]
async fn authorizer_grants_unlisted_policies() {
    let policies = vec![
        for_users(restricted("listed"), &["alice"], &[]),
        restricted("granted"),
        restricted("ungranted"),
    ];
    let authorizer = ListAuthorizer {
        allowed: vec!["granted".to_owned()],
        ns: "tenant".to_owned(),
    };
    let alice = UserInfo::new("alice", Vec::<String>::new());

    let found = find_applicable_policies(&policies, &alice, "tenant", Some(&authorizer)).await;
    assert_eq!(names(&found), vec!["listed", "granted"]);

    let elsewhere = find_applicable_policies(&policies, &alice, "other", Some(&authorizer)).await;
    assert_eq!(names(&elsewhere), vec!["listed"]);

    let without = find_applicable_policies(&policies, &alice, "tenant", None).await;
    assert_eq!(names(&without), vec!["listed"]);
}

#[tokio::test]
async fn matcher_merges_identities_and_sorts() {
    let mut high = for_users(permissive("high"), &[], &["system:serviceaccounts:tenant"]);
    high.priority = Some(10);
    let low = for_users(restricted("low"), &["alice"], &[]);
    let both = for_users(restricted("both"), &["alice"], &["system:serviceaccounts"]);

    let matcher = PolicyMatcher::new(vec![low, both, high]).with_authorizer(Arc::new(ListAuthorizer {
        allowed: Vec::new(),
        ns: String::new(),
    }));
    assert_eq!(matcher.policies().len(), 3);

    let users = [
        UserInfo::new("alice", Vec::<String>::new()),
        UserInfo::service_account("tenant", "default"),
    ];
    let found = matcher.find(&users, "tenant").await;
    assert_eq!(names(&found), vec!["high", "both", "low"]);

    let nobody = matcher.find(&[UserInfo::new("mallory", Vec::<String>::new())], "tenant").await;
    assert!(nobody.is_empty());
}
