//! Account provisioning state machine.
//!
//! One cycle: fetch the record, refresh the observed status from the cluster
//! and the provider, walk the provisioning checklist in order, then write the
//! status back if it differs from what was read. Each step is gated by its
//! status flag and sets it only after succeeding, so a failed cycle leaves a
//! status from which the next cycle resumes at the failed step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use kuadra_core::{
    diff_groups, validate_principal, AwsAccount, AwsAccountSpec, AwsAccountStatus, ObjectKey, ACCESS_KEY_SECRET,
    LOGIN_PROFILE_SECRET,
};
use kuadra_iam::IdentityProvider;
use kuadra_kubehub::{ClusterStore, RecordStore};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{checkpoint, ReconcileError};
use crate::password::PasswordPolicy;
use crate::refresh::refresh_status;

/// Result of a cycle that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record no longer exists; nothing to do.
    Gone,
    Reconciled { status_written: bool, converged: bool },
}

pub struct AccountReconciler {
    iam: Arc<dyn IdentityProvider>,
    cluster: Arc<dyn ClusterStore>,
    records: Arc<dyn RecordStore<AwsAccount>>,
    passwords: PasswordPolicy,
}

impl AccountReconciler {
    pub fn new(
        iam: Arc<dyn IdentityProvider>,
        cluster: Arc<dyn ClusterStore>,
        records: Arc<dyn RecordStore<AwsAccount>>,
    ) -> Self {
        Self { iam, cluster, records, passwords: PasswordPolicy::default() }
    }

    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.passwords = policy;
        self
    }

    /// Run one reconcile cycle for the account at `key`.
    ///
    /// On a step failure the partially advanced status is still written back
    /// (when it changed) before the step error is returned. A cancelled cycle
    /// writes nothing.
    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Outcome, ReconcileError> {
        let started = Instant::now();
        counter!("reconcile_total", 1u64, "kind" => "AwsAccount");
        let res = self.cycle(key, cancel).await;
        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => "AwsAccount");
        if let Err(e) = &res {
            counter!("reconcile_errors_total", 1u64, "kind" => "AwsAccount", "error" => e.kind());
        }
        res
    }

    async fn cycle(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Outcome, ReconcileError> {
        checkpoint(cancel)?;
        let Some(previous) = self.records.get(key).await? else {
            debug!(key = %key, "account gone");
            return Ok(Outcome::Gone);
        };
        let spec = &previous.spec;
        validate_principal(&spec.user_name)?;
        let before = previous.observed();

        let mut status = refresh_status(self.iam.as_ref(), self.cluster.as_ref(), &spec.user_name, cancel).await?;
        let converged = self.converge(spec, &mut status, cancel).await;

        match converged {
            Ok(()) => {
                let status_written = self.write_back(&previous, &before, status.clone(), cancel).await?;
                let converged = status.is_converged(spec);
                info!(key = %key, principal = %spec.user_name, status_written, converged, "account reconciled");
                Ok(Outcome::Reconciled { status_written, converged })
            }
            Err(ReconcileError::Cancelled) => Err(ReconcileError::Cancelled),
            Err(step_err) => {
                if let Err(e) = self.write_back(&previous, &before, status, cancel).await {
                    warn!(key = %key, error = %e, "failed to record partial status");
                }
                Err(step_err)
            }
        }
    }

    /// Apply the missing provisioning steps, advancing `status` as each succeeds.
    pub async fn converge(
        &self,
        spec: &AwsAccountSpec,
        status: &mut AwsAccountStatus,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let user = spec.user_name.as_str();

        if !status.namespace_created {
            checkpoint(cancel)?;
            self.cluster.create_namespace_if_absent(user).await?;
            info!(principal = %user, "namespace ensured");
            status.namespace_created = true;
        }

        if !status.user_created {
            checkpoint(cancel)?;
            self.iam.create_user_if_absent(user).await?;
            info!(principal = %user, "user ensured");
            status.user_created = true;
        }

        if !status.login_profile_created {
            self.ensure_login_profile(user, cancel).await?;
            info!(principal = %user, secret = LOGIN_PROFILE_SECRET, "login profile ensured");
            status.login_profile_created = true;
        }

        if status.access_key_created && !self.access_key_stored(user, cancel).await? {
            warn!(principal = %user, secret = ACCESS_KEY_SECRET, "access key exists but its secret is missing; minting a replacement");
            status.access_key_created = false;
        }
        if !status.access_key_created {
            self.ensure_access_key(user, cancel).await?;
            info!(principal = %user, secret = ACCESS_KEY_SECRET, "access key ensured");
            status.access_key_created = true;
        }

        let diff = diff_groups(&spec.groups, &status.current_groups);
        for group in diff.to_add {
            checkpoint(cancel)?;
            self.iam.add_to_group(&group, user).await?;
            info!(principal = %user, group = %group, "added to group");
            status.current_groups.push(group);
        }
        for group in diff.to_remove {
            checkpoint(cancel)?;
            self.iam.remove_from_group(&group, user).await?;
            info!(principal = %user, group = %group, "removed from group");
            status.current_groups.retain(|g| *g != group);
        }
        Ok(())
    }

    /// Create the profile from the password on record, generating and storing
    /// one first when none exists, so a retry never diverges from the secret.
    async fn ensure_login_profile(&self, user: &str, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        checkpoint(cancel)?;
        let password = match stored_password(self.cluster.read_secret(user, LOGIN_PROFILE_SECRET).await?) {
            Some(password) => password,
            None => {
                let fresh = self.passwords.generate()?;
                let data = BTreeMap::from([("userName".to_string(), user.to_string()), ("password".to_string(), fresh)]);
                checkpoint(cancel)?;
                self.cluster.write_secret_if_absent(user, LOGIN_PROFILE_SECRET, data).await?;
                // Read back: a concurrent writer may have won the create.
                checkpoint(cancel)?;
                stored_password(self.cluster.read_secret(user, LOGIN_PROFILE_SECRET).await?).ok_or_else(|| {
                    ReconcileError::SecretIncomplete {
                        namespace: user.to_string(),
                        name: LOGIN_PROFILE_SECRET.to_string(),
                        key: "password",
                    }
                })?
            }
        };

        checkpoint(cancel)?;
        self.iam.create_login_profile_if_absent(&password, user, true).await?;
        Ok(())
    }

    async fn access_key_stored(&self, user: &str, cancel: &CancellationToken) -> Result<bool, ReconcileError> {
        checkpoint(cancel)?;
        let stored = self.cluster.read_secret(user, ACCESS_KEY_SECRET).await?;
        Ok(stored.is_some_and(|data| data.contains_key("accessKeyId") && data.contains_key("secretAccessKey")))
    }

    async fn ensure_access_key(&self, user: &str, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        checkpoint(cancel)?;
        let key = self.iam.create_access_key(user).await?;
        // The provider hands out the key secret exactly once: persist before anything can abort.
        let data = BTreeMap::from([
            ("accessKeyId".to_string(), key.id.clone()),
            ("secretAccessKey".to_string(), key.secret),
        ]);
        self.cluster.put_secret(user, ACCESS_KEY_SECRET, data).await?;
        debug!(principal = %user, access_key_id = %key.id, "access key stored");
        Ok(())
    }

    async fn write_back(
        &self,
        previous: &AwsAccount,
        before: &AwsAccountStatus,
        status: AwsAccountStatus,
        cancel: &CancellationToken,
    ) -> Result<bool, ReconcileError> {
        if before.same_as(&status) {
            return Ok(false);
        }
        checkpoint(cancel)?;
        let mut next = previous.clone();
        next.status = Some(status);
        self.records.update_status(&next).await?;
        counter!("status_writes_total", 1u64, "kind" => "AwsAccount");
        Ok(true)
    }
}

fn stored_password(secret: Option<BTreeMap<String, String>>) -> Option<String> {
    secret.and_then(|mut data| data.remove("password"))
}
