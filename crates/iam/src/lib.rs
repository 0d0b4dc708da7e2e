//! Kuadra IAM: the identity provider capability consumed by the reconcilers.
//!
//! Queries map "no such entity" to a negative answer and every `*_if_absent`
//! mutation treats "already exists" as success, so callers only ever see real
//! failures.

#![forbid(unsafe_code)]

mod aws;
mod memory;

pub use aws::AwsIam;
pub use memory::{IamCall, IamOp, MemoryIam};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-west-2";

use serde::{Deserialize, Serialize};

/// Provider failures. Absence and duplicate-create never show up here.
#[derive(Debug, thiserror::Error)]
pub enum IamError {
    #[error("{op}: provider rejected request: {message}")]
    Api { op: &'static str, message: String },
    #[error("{op}: transport failure: {message}")]
    Transport { op: &'static str, message: String },
    #[error("{op}: response missing {field}")]
    MissingField { op: &'static str, field: &'static str },
}

impl IamError {
    pub fn op(&self) -> &'static str {
        match self {
            IamError::Api { op, .. } | IamError::Transport { op, .. } | IamError::MissingField { op, .. } => op,
        }
    }
}

pub type IamResult<T> = Result<T, IamError>;

/// Programmatic credential pair returned once at creation time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub secret: String,
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey").field("id", &self.id).field("secret", &"<redacted>").finish()
    }
}

/// Identity provider operations used by status refresh and the account reconciler.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_exists(&self, user: &str) -> IamResult<bool>;
    async fn has_login_profile(&self, user: &str) -> IamResult<bool>;
    async fn has_access_key(&self, user: &str) -> IamResult<bool>;
    /// Group names the user belongs to, in provider order.
    async fn list_groups(&self, user: &str) -> IamResult<Vec<String>>;

    async fn create_user_if_absent(&self, user: &str) -> IamResult<()>;
    async fn create_login_profile_if_absent(&self, password: &str, user: &str, reset_required: bool) -> IamResult<()>;
    async fn create_access_key(&self, user: &str) -> IamResult<AccessKey>;
    async fn add_to_group(&self, group: &str, user: &str) -> IamResult<()>;
    async fn remove_from_group(&self, group: &str, user: &str) -> IamResult<()>;
}
