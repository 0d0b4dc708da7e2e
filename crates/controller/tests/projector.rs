#![forbid(unsafe_code)]

use std::sync::Arc;

use kube::ResourceExt;
use kuadra_controller::{ProjectOutcome, ReconcileError, UserProjector};
use kuadra_core::{
    AccountTemplate, AccountTemplateSpec, AccountUser, AwsAccount, AwsAccountStatus, ObjectKey, StoreError, User, UserSpec,
};
use kuadra_kubehub::{MemoryRecords, RecordStore};
use tokio_util::sync::CancellationToken;

fn user(principal: &str, groups: &[&str]) -> User {
    let spec = UserSpec {
        aws_account: AccountTemplate {
            spec: AccountTemplateSpec {
                user: AccountUser {
                    user_name: principal.into(),
                    groups: groups.iter().map(|g| g.to_string()).collect(),
                    zones: vec!["ib.kuadra.io".into()],
                },
            },
        },
    };
    let mut u = User::new("alice", spec);
    u.metadata.namespace = Some("team".into());
    u.metadata.uid = Some("0b7e2c4a-user".into());
    u
}

fn setup() -> (Arc<MemoryRecords<User>>, Arc<MemoryRecords<AwsAccount>>, UserProjector) {
    let users = Arc::new(MemoryRecords::<User>::new());
    let accounts = Arc::new(MemoryRecords::<AwsAccount>::new());
    let projector = UserProjector::new(users.clone(), accounts.clone());
    (users, accounts, projector)
}

fn parent() -> ObjectKey { ObjectKey::namespaced("team", "alice") }
fn child() -> ObjectKey { ObjectKey::namespaced("team", "ib-dns") }

#[tokio::test]
async fn creates_owned_child_named_after_principal() {
    let (users, accounts, projector) = setup();
    users.seed(user("ib-dns", &["dns-management"]));

    let out = projector.project(&parent(), &CancellationToken::new()).await.unwrap();
    assert_eq!(out, ProjectOutcome::Created);
    let acct = accounts.get_now(&child()).unwrap();
    assert_eq!(acct.spec.user_name, "ib-dns");
    assert_eq!(acct.spec.groups, vec!["dns-management".to_string()]);
    assert_eq!(acct.spec.zones, vec!["ib.kuadra.io".to_string()]);
    let owner = &acct.owner_references()[0];
    assert_eq!(owner.name, "alice");
    assert_eq!(owner.uid, "0b7e2c4a-user");
    assert_eq!(accounts.creates(), 1);
}

#[tokio::test]
async fn existing_child_is_overwritten_and_keeps_status() {
    let (users, accounts, projector) = setup();
    users.seed(user("ib-dns", &["a"]));
    projector.project(&parent(), &CancellationToken::new()).await.unwrap();

    let mut acct = accounts.get_now(&child()).unwrap();
    acct.status = Some(AwsAccountStatus { user_created: true, ..Default::default() });
    accounts.update_status(&acct).await.unwrap();

    let mut changed = users.get_now(&parent()).unwrap();
    changed.spec.aws_account.spec.user.groups = vec!["b".into()];
    changed.spec.aws_account.spec.user.zones.clear();
    users.update(&changed).await.unwrap();

    let out = projector.project(&parent(), &CancellationToken::new()).await.unwrap();
    assert_eq!(out, ProjectOutcome::Updated);
    let acct = accounts.get_now(&child()).unwrap();
    assert_eq!(acct.spec.groups, vec!["b".to_string()]);
    assert!(acct.spec.zones.is_empty());
    assert!(acct.observed().user_created);
    assert_eq!(accounts.updates(), 1);
}

#[tokio::test]
async fn create_race_counts_as_created() {
    let (users, accounts, projector) = setup();
    users.seed(user("ib-dns", &[]));
    accounts.fail_next_write(StoreError::AlreadyExists("team/ib-dns".into()));
    let out = projector.project(&parent(), &CancellationToken::new()).await.unwrap();
    assert_eq!(out, ProjectOutcome::Created);
}

#[tokio::test]
async fn update_conflict_is_retryable() {
    let (users, accounts, projector) = setup();
    users.seed(user("ib-dns", &[]));
    projector.project(&parent(), &CancellationToken::new()).await.unwrap();
    accounts.fail_next_write(StoreError::Conflict("team/ib-dns".into()));
    let err = projector.project(&parent(), &CancellationToken::new()).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_parent_is_gone() {
    let (_users, accounts, projector) = setup();
    let out = projector.project(&parent(), &CancellationToken::new()).await.unwrap();
    assert_eq!(out, ProjectOutcome::Gone);
    assert_eq!(accounts.creates(), 0);
}

#[tokio::test]
async fn invalid_principal_creates_nothing() {
    let (users, accounts, projector) = setup();
    users.seed(user("not valid", &[]));
    let err = projector.project(&parent(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSpec(_)));
    assert_eq!(accounts.creates(), 0);
}
