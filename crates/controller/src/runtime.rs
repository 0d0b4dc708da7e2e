//! Watch-driven controller loop for both kinds.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::{controller::Action, watcher, Controller};
use kube::{Api, Client, ResourceExt};
use kuadra_core::{AwsAccount, ObjectKey, User};
use kuadra_iam::IdentityProvider;
use kuadra_kubehub::{KubeCluster, KubeRecords};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::{AccountReconciler, Outcome};
use crate::error::ReconcileError;
use crate::projector::UserProjector;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Watch a single namespace; `None` watches all.
    pub namespace: Option<String>,
    /// Delay before retrying a failed cycle.
    pub requeue: Duration,
    /// Period for re-observing converged accounts.
    pub resync: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self { Self { namespace: None, requeue: Duration::from_secs(3), resync: Duration::from_secs(300) } }
}

impl ControllerConfig {
    /// Next action after a failed cycle.
    pub fn on_error(&self, err: &ReconcileError) -> Action {
        match err {
            ReconcileError::Cancelled => Action::await_change(),
            e if e.is_retryable() => Action::requeue(self.requeue),
            _ => Action::requeue(self.resync),
        }
    }
}

struct Context {
    accounts: AccountReconciler,
    projector: UserProjector,
    config: ControllerConfig,
    cancel: CancellationToken,
}

fn key_of<K: kube::Resource>(obj: &K) -> ObjectKey { ObjectKey::new(obj.namespace().as_deref(), &obj.name_any()) }

async fn reconcile_account(obj: Arc<AwsAccount>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    match ctx.accounts.reconcile(&key_of(obj.as_ref()), &ctx.cancel).await? {
        Outcome::Gone => Ok(Action::await_change()),
        Outcome::Reconciled { converged: true, .. } => Ok(Action::requeue(ctx.config.resync)),
        Outcome::Reconciled { converged: false, .. } => Ok(Action::requeue(ctx.config.requeue)),
    }
}

async fn project_user(obj: Arc<User>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    // Child changes come back through the owns() watch, so there is nothing to poll for.
    ctx.projector.project(&key_of(obj.as_ref()), &ctx.cancel).await?;
    Ok(Action::await_change())
}

fn account_error(obj: Arc<AwsAccount>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(key = %key_of(obj.as_ref()), error = %err, retryable = err.is_retryable(), "account reconcile failed");
    ctx.config.on_error(err)
}

fn user_error(obj: Arc<User>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(key = %key_of(obj.as_ref()), error = %err, retryable = err.is_retryable(), "user projection failed");
    ctx.config.on_error(err)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the AwsAccount and User controllers until `cancel` fires.
pub async fn run(
    client: Client,
    iam: Arc<dyn IdentityProvider>,
    config: ControllerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let accounts_store = Arc::new(KubeRecords::<AwsAccount>::new(client.clone()));
    let ctx = Arc::new(Context {
        accounts: AccountReconciler::new(iam, Arc::new(KubeCluster::new(client.clone())), accounts_store.clone()),
        projector: UserProjector::new(Arc::new(KubeRecords::<User>::new(client.clone())), accounts_store),
        config: config.clone(),
        cancel: cancel.clone(),
    });
    let ns = config.namespace.as_deref();
    info!(namespace = ns.unwrap_or("*"), requeue_s = config.requeue.as_secs(), resync_s = config.resync.as_secs(), "starting controllers");

    let accounts = Controller::new(api::<AwsAccount>(&client, ns), watcher::Config::default())
        .run(reconcile_account, account_error, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(account = %obj.name, "account cycle done"),
                Err(e) => debug!(error = %e, "account controller event"),
            }
        });
    let users = Controller::new(api::<User>(&client, ns), watcher::Config::default())
        .owns(api::<AwsAccount>(&client, ns), watcher::Config::default())
        .run(project_user, user_error, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(user = %obj.name, "user cycle done"),
                Err(e) => debug!(error = %e, "user controller event"),
            }
        });

    tokio::select! {
        _ = futures::future::join(accounts, users) => {
            warn!("controller streams ended");
        }
        _ = cancel.cancelled() => {
            info!("shutdown requested; stopping controllers");
        }
    }
    Ok(())
}
