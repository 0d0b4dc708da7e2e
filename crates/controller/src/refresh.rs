//! Observed-status snapshot for one principal.

use kuadra_core::AwsAccountStatus;
use kuadra_iam::IdentityProvider;
use kuadra_kubehub::ClusterStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{checkpoint, ReconcileError};

/// Query the cluster and the provider for what currently exists.
///
/// A missing user short-circuits: login profile, access key and memberships
/// cannot exist without it, so they are reported as absent without asking.
/// Any failed query fails the whole refresh.
pub async fn refresh_status(
    iam: &dyn IdentityProvider,
    cluster: &dyn ClusterStore,
    principal: &str,
    cancel: &CancellationToken,
) -> Result<AwsAccountStatus, ReconcileError> {
    let mut status = AwsAccountStatus::default();

    checkpoint(cancel)?;
    status.namespace_created = cluster.namespace_exists(principal).await?;

    checkpoint(cancel)?;
    if !iam.user_exists(principal).await? {
        debug!(principal = %principal, "user absent; skipping sub-resource queries");
        return Ok(status);
    }
    status.user_created = true;

    checkpoint(cancel)?;
    status.login_profile_created = iam.has_login_profile(principal).await?;
    checkpoint(cancel)?;
    status.access_key_created = iam.has_access_key(principal).await?;
    checkpoint(cancel)?;
    status.current_groups = iam.list_groups(principal).await?;

    Ok(status)
}
