use kuadra_core::{PrincipalError, StoreError};
use kuadra_iam::IamError;
use tokio_util::sync::CancellationToken;

use crate::password::PasswordError;

/// Why a reconcile cycle stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] PrincipalError),
    #[error("identity provider: {0}")]
    Provider(#[from] IamError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("password generation: {0}")]
    Password(#[from] PasswordError),
    #[error("secret {namespace}/{name} is missing key {key}")]
    SecretIncomplete { namespace: String, name: String, key: &'static str },
    #[error("owner {0} has no uid; cannot set controller reference")]
    OwnerWithoutUid(String),
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Retryable errors requeue on the short delay; the rest wait for a spec change
    /// or the periodic resync. A store rejecting an object as invalid will keep
    /// rejecting it until the input changes.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::InvalidSpec(_)
                | ReconcileError::Password(_)
                | ReconcileError::OwnerWithoutUid(_)
                | ReconcileError::Store(StoreError::Invalid(_))
        )
    }

    pub fn is_conflict(&self) -> bool { matches!(self, ReconcileError::Store(e) if e.is_conflict()) }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::InvalidSpec(_) => "invalid_spec",
            ReconcileError::Provider(_) => "provider",
            ReconcileError::Store(StoreError::Conflict(_)) => "conflict",
            ReconcileError::Store(StoreError::Invalid(_)) => "invalid",
            ReconcileError::Store(_) => "store",
            ReconcileError::Password(_) => "password",
            ReconcileError::SecretIncomplete { .. } => "secret",
            ReconcileError::OwnerWithoutUid(_) => "owner",
            ReconcileError::Cancelled => "cancelled",
        }
    }
}

/// Abort before the next external call once the caller has cancelled.
pub(crate) fn checkpoint(cancel: &CancellationToken) -> Result<(), ReconcileError> {
    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_by_kind() {
        assert!(ReconcileError::Store(StoreError::Conflict("rv".into())).is_retryable());
        assert!(ReconcileError::Store(StoreError::Conflict("rv".into())).is_conflict());
        assert!(ReconcileError::Provider(IamError::Transport { op: "GetUser", message: "timeout".into() }).is_retryable());
        assert!(!ReconcileError::InvalidSpec(PrincipalError::Empty).is_retryable());
        assert!(!ReconcileError::Store(StoreError::Invalid("namespace name rejected".into())).is_retryable());
        assert!(ReconcileError::Store(StoreError::Backend("connection reset".into())).is_retryable());
        assert_eq!(ReconcileError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn checkpoint_honors_cancellation() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token).is_ok());
        token.cancel();
        assert!(matches!(checkpoint(&token), Err(ReconcileError::Cancelled)));
    }
}
