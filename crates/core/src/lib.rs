//! Kuadra core: resource types, group diffing and the error taxonomy shared by
//! the capability layers.

#![forbid(unsafe_code)]

pub mod groups;
pub mod resources;

use once_cell::sync::Lazy;
use regex::Regex;

pub use groups::{diff_groups, GroupDiff};
pub use resources::{
    AccountTemplate, AccountTemplateSpec, AccountUser, AwsAccount, AwsAccountSpec, AwsAccountStatus, User, UserSpec,
};

/// API group served by the operator.
pub const API_GROUP: &str = "kuadra.kuadrant.io";

/// Name of the secret holding the generated console password.
pub const LOGIN_PROFILE_SECRET: &str = "login-profile";
/// Name of the secret holding the programmatic key pair.
pub const ACCESS_KEY_SECRET: &str = "access-key";

/// Namespaced object address (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self { Self::new(Some(namespace), name) }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Errors surfaced by the object store and cluster store capabilities.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    /// Optimistic concurrency failure; the caller must re-fetch and re-run.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }
    pub fn is_already_exists(&self) -> bool { matches!(self, StoreError::AlreadyExists(_)) }
    pub fn is_conflict(&self) -> bool { matches!(self, StoreError::Conflict(_)) }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Provider user-name alphabet: word characters plus `+=,.@-`.
static PROVIDER_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9+=,.@_-]+$").expect("static regex"));
/// RFC 1123 label, the namespace naming rule.
static NAMESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex"));

/// Longest principal: the namespace label limit, below the provider's 64.
pub const MAX_PRINCIPAL_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrincipalError {
    #[error("principal name is empty")]
    Empty,
    #[error("principal name {0:?} is longer than 63 characters")]
    TooLong(String),
    #[error("principal name {0:?} contains characters outside [A-Za-z0-9+=,.@_-]")]
    Alphabet(String),
    #[error("principal name {0:?} is not a namespace name (lowercase alphanumerics and '-', alphanumeric at both ends)")]
    NotNamespaceName(String),
}

/// Validate a principal name before it is used for any external call.
///
/// The name is both the provider user name and the namespace holding the
/// credentials, so it must satisfy both naming rules.
pub fn validate_principal(name: &str) -> Result<(), PrincipalError> {
    if name.is_empty() { return Err(PrincipalError::Empty); }
    if name.chars().count() > MAX_PRINCIPAL_LEN { return Err(PrincipalError::TooLong(name.to_string())); }
    if !PROVIDER_NAME_RE.is_match(name) { return Err(PrincipalError::Alphabet(name.to_string())); }
    if !NAMESPACE_RE.is_match(name) { return Err(PrincipalError::NotNamespaceName(name.to_string())); }
    Ok(())
}
