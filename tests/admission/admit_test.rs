//! Tests for admitting pods.

use straylight::admission::AdmissionError;
use straylight::types::UserInfo;

use crate::support::{admission, alice, anything, keys, pod, privileged, restricted};

#[tokio::test]
async fn most_restrictive_policy_wins() {
    let admission = admission(vec![anything("anything"), restricted("restricted")]).await;
    let mut pod = pod("tenant");

    let policy = match admission.admit(&mut pod, &alice()).await {
        Ok(policy) => policy,
        Err(err) => panic!("pod should be admitted: {err}"),
    };
    assert_eq!(policy, "restricted");
    assert_eq!(
        pod.annotations.get(&keys().validated_policy).map(String::as_str),
        Some("restricted")
    );

    let pod_sc = pod.spec.security_context.clone().unwrap_or_default();
    assert_eq!(pod_sc.fs_group, Some(2));
    assert_eq!(pod_sc.se_linux_options.map(|o| o.level), Some("s0:c1,c0".to_owned()));
    let uid = pod
        .spec
        .containers
        .first()
        .and_then(|c| c.security_context.as_ref())
        .and_then(|sc| sc.run_as_user);
    assert_eq!(uid, Some(1));
}

#[tokio::test]
async fn falls_through_to_a_permissive_policy() {
    let admission = admission(vec![restricted("restricted"), anything("anything")]).await;
    let mut pod = privileged(pod("tenant"));

    match admission.admit(&mut pod, &alice()).await {
        Ok(policy) => assert_eq!(policy, "anything"),
        Err(err) => panic!("privileged pod should pass anything: {err}"),
    }
    // Only the admitting policy's defaults are applied.
    assert_eq!(pod.spec.security_context.and_then(|sc| sc.fs_group), None);
}

#[tokio::test]
async fn explicit_priority_beats_restrictiveness() {
    let mut preferred = anything("preferred");
    preferred.priority = Some(1);
    let admission = admission(vec![restricted("restricted"), preferred]).await;
    let mut pod = pod("tenant");

    match admission.admit(&mut pod, &alice()).await {
        Ok(policy) => assert_eq!(policy, "preferred"),
        Err(err) => panic!("pod should be admitted: {err}"),
    }
}

#[tokio::test]
async fn unknown_user_has_no_providers() {
    let admission = admission(vec![restricted("restricted")]).await;
    let mut pod = pod("tenant");
    let before = pod.clone();

    let err = admission
        .admit(&mut pod, &UserInfo::new("mallory", Vec::<String>::new()))
        .await;
    assert!(matches!(err, Err(AdmissionError::NoProviders)));
    assert_eq!(pod, before);
}

#[tokio::test]
async fn every_rejection_is_reported() {
    let admission = admission(vec![restricted("restricted"), restricted("restricted-v2")]).await;
    let mut pod = privileged(pod("tenant"));
    let before = pod.clone();

    let reasons = match admission.admit(&mut pod, &alice()).await {
        Err(AdmissionError::Forbidden { reasons }) => reasons,
        Err(other) => panic!("expected forbidden, got {other}"),
        Ok(policy) => panic!("privileged pod admitted by {policy}"),
    };
    let parts: Vec<&str> = reasons.split("; ").collect();
    assert_eq!(parts.len(), 2);
    assert!(parts[0].starts_with("provider restricted: "));
    assert!(parts[1].starts_with("provider restricted-v2: "));
    assert!(reasons.contains(
        "spec.containers[0].securityContext.privileged: Invalid value: true: Privileged containers are not allowed"
    ));
    assert_eq!(pod, before);
}

#[tokio::test]
async fn service_account_grants_its_policies() {
    let mut builder = anything("builder");
    builder.groups = vec!["system:serviceaccounts:tenant".to_owned()];
    let admission = admission(vec![builder]).await;

    let bob = UserInfo::new("bob", Vec::<String>::new());
    let mut pod = privileged(pod("tenant"));
    assert!(matches!(
        admission.admit(&mut pod.clone(), &bob).await,
        Err(AdmissionError::NoProviders)
    ));

    pod.spec.service_account_name = "ci".to_owned();
    match admission.admit(&mut pod, &bob).await {
        Ok(policy) => assert_eq!(policy, "builder"),
        Err(err) => panic!("service account should grant builder: {err}"),
    }
}

#[tokio::test]
async fn preallocated_policies_need_the_namespace() {
    let admission = admission(vec![restricted("restricted"), anything("anything")]).await;
    let mut pod = pod("elsewhere");
    match admission.admit(&mut pod, &alice()).await {
        Ok(policy) => assert_eq!(policy, "anything"),
        Err(err) => panic!("anything should still apply: {err}"),
    }

    let only_restricted = crate::support::admission(vec![restricted("restricted")]).await;
    let mut pod = crate::support::pod("elsewhere");
    assert!(matches!(
        only_restricted.admit(&mut pod, &alice()).await,
        Err(AdmissionError::NoProviders)
    ));
}
