//! User to AwsAccount projection.

use std::sync::Arc;
use std::time::Instant;

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use kuadra_core::{validate_principal, AwsAccount, ObjectKey, User};
use kuadra_kubehub::RecordStore;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{checkpoint, ReconcileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// The parent no longer exists.
    Gone,
    Created,
    Updated,
}

/// Keeps exactly one child `AwsAccount` per `User`, named after the principal
/// and living in the parent's namespace.
pub struct UserProjector {
    users: Arc<dyn RecordStore<User>>,
    accounts: Arc<dyn RecordStore<AwsAccount>>,
}

impl UserProjector {
    pub fn new(users: Arc<dyn RecordStore<User>>, accounts: Arc<dyn RecordStore<AwsAccount>>) -> Self {
        Self { users, accounts }
    }

    pub async fn project(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<ProjectOutcome, ReconcileError> {
        let started = Instant::now();
        counter!("reconcile_total", 1u64, "kind" => "User");
        let res = self.upsert(key, cancel).await;
        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => "User");
        if let Err(e) = &res {
            counter!("reconcile_errors_total", 1u64, "kind" => "User", "error" => e.kind());
        }
        res
    }

    async fn upsert(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<ProjectOutcome, ReconcileError> {
        checkpoint(cancel)?;
        let Some(user) = self.users.get(key).await? else {
            debug!(key = %key, "user gone");
            return Ok(ProjectOutcome::Gone);
        };
        let mut child = child_account(&user)?;
        let child_key = ObjectKey::new(child.metadata.namespace.as_deref(), &child.name_any());

        checkpoint(cancel)?;
        let outcome = match self.accounts.get(&child_key).await? {
            None => {
                checkpoint(cancel)?;
                match self.accounts.create(&child).await {
                    Ok(_) => {}
                    Err(e) if e.is_already_exists() => debug!(child = %child_key, "account appeared concurrently"),
                    Err(e) => return Err(e.into()),
                }
                ProjectOutcome::Created
            }
            Some(existing) => {
                child.metadata.resource_version = existing.metadata.resource_version;
                checkpoint(cancel)?;
                self.accounts.update(&child).await?;
                ProjectOutcome::Updated
            }
        };
        let op = if outcome == ProjectOutcome::Created { "create" } else { "update" };
        counter!("projector_upserts_total", 1u64, "op" => op);
        info!(user = %key, account = %child_key, op, "account projected");
        Ok(outcome)
    }
}

/// Derive the child account from the parent's embedded template, owned by the parent.
pub fn child_account(user: &User) -> Result<AwsAccount, ReconcileError> {
    let principal = user.spec.principal();
    validate_principal(principal)?;
    let owner = user.controller_owner_ref(&()).ok_or_else(|| ReconcileError::OwnerWithoutUid(user.name_any()))?;
    let mut child = AwsAccount::new(principal, user.spec.account_spec());
    child.metadata = ObjectMeta {
        name: Some(principal.to_string()),
        namespace: user.namespace(),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuadra_core::{AccountTemplate, AccountTemplateSpec, AccountUser, UserSpec};

    fn user(principal: &str, uid: Option<&str>) -> User {
        let mut u = User::new(
            "alice",
            UserSpec {
                aws_account: AccountTemplate {
                    spec: AccountTemplateSpec {
                        user: AccountUser { user_name: principal.into(), groups: vec!["g".into()], zones: vec![] },
                    },
                },
            },
        );
        u.metadata.namespace = Some("team".into());
        u.metadata.uid = uid.map(|s| s.to_string());
        u
    }

    #[test]
    fn child_is_named_after_principal_and_owned() {
        let child = child_account(&user("ib-dns", Some("uid-1"))).unwrap();
        assert_eq!(child.name_any(), "ib-dns");
        assert_eq!(child.namespace().as_deref(), Some("team"));
        assert_eq!(child.spec.groups, vec!["g".to_string()]);
        let owners = child.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "User");
        assert_eq!(owners[0].uid, "uid-1");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn parent_without_uid_or_bad_principal_is_rejected() {
        assert!(matches!(child_account(&user("ib-dns", None)), Err(ReconcileError::OwnerWithoutUid(_))));
        assert!(matches!(child_account(&user("", Some("u"))), Err(ReconcileError::InvalidSpec(_))));
    }
}
