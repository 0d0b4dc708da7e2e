//! Custom resources served under `kuadra.kuadrant.io/v1`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::groups::same_members;

/// Desired state of a provisioned cloud identity.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kuadra.kuadrant.io",
    version = "v1",
    kind = "AwsAccount",
    namespaced,
    status = "AwsAccountStatus",
    shortname = "awsacct",
    printcolumn = r#"{"name":"User","type":"string","jsonPath":".spec.userName"}"#,
    printcolumn = r#"{"name":"Created","type":"boolean","jsonPath":".status.userCreated"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AwsAccountSpec {
    /// Provider user name; also names the namespace holding the credentials.
    pub user_name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Reserved for zone provisioning; carried but not acted upon.
    #[serde(default)]
    pub zones: Vec<String>,
}

/// Observed state, refreshed from the provider on every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsAccountStatus {
    #[serde(default)]
    pub namespace_created: bool,
    #[serde(default)]
    pub user_created: bool,
    #[serde(default)]
    pub login_profile_created: bool,
    #[serde(default)]
    pub access_key_created: bool,
    #[serde(default)]
    pub current_groups: Vec<String>,
}

impl AwsAccountStatus {
    /// Field-by-field equality used to gate status write-back.
    /// Group order is significant: a reordering is a change worth recording.
    pub fn same_as(&self, other: &AwsAccountStatus) -> bool {
        self.namespace_created == other.namespace_created
            && self.user_created == other.user_created
            && self.login_profile_created == other.login_profile_created
            && self.access_key_created == other.access_key_created
            && self.current_groups == other.current_groups
    }

    /// True when no corrective action remains for `spec`.
    pub fn is_converged(&self, spec: &AwsAccountSpec) -> bool {
        self.namespace_created
            && self.user_created
            && self.login_profile_created
            && self.access_key_created
            && same_members(&self.current_groups, &spec.groups)
    }
}

impl AwsAccount {
    /// Status as last persisted; a never-reconciled account reads as all-false.
    pub fn observed(&self) -> AwsAccountStatus { self.status.clone().unwrap_or_default() }
}

/// A person or workload that owns exactly one provisioned account.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kuadra.kuadrant.io",
    version = "v1",
    kind = "User",
    namespaced,
    printcolumn = r#"{"name":"AwsUser","type":"string","jsonPath":".spec.awsAccount.spec.user.userName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub aws_account: AccountTemplate,
}

/// Embedded desired-account template projected into a child `AwsAccount`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccountTemplate {
    pub spec: AccountTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AccountTemplateSpec {
    pub user: AccountUser,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountUser {
    pub user_name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl UserSpec {
    pub fn principal(&self) -> &str { &self.aws_account.spec.user.user_name }

    /// Child spec derived from the embedded template.
    pub fn account_spec(&self) -> AwsAccountSpec {
        let u = &self.aws_account.spec.user;
        AwsAccountSpec { user_name: u.user_name.clone(), groups: u.groups.clone(), zones: u.zones.clone() }
    }
}
