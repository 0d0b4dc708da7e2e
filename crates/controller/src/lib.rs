//! Kuadra controller: reconcilers for `AwsAccount` and `User`.
//!
//! - [`AccountReconciler`] refreshes what the provider and the cluster hold for a
//!   principal, then runs the missing provisioning steps in order (namespace,
//!   user, login profile, access key, group membership) and records progress in
//!   the account status.
//! - [`UserProjector`] keeps one owned `AwsAccount` per `User`.
//! - [`run`] wires both into kube-rs controllers.
//!
//! Capabilities are injected as trait objects so the same reconcilers run
//! against the cluster and AWS or against the in-memory doubles.

#![forbid(unsafe_code)]

mod account;
mod error;
pub mod password;
mod projector;
mod refresh;
mod runtime;

pub use account::{AccountReconciler, Outcome};
pub use error::ReconcileError;
pub use password::{PasswordError, PasswordPolicy};
pub use projector::{child_account, ProjectOutcome, UserProjector};
pub use refresh::refresh_status;
pub use runtime::{run, ControllerConfig};
