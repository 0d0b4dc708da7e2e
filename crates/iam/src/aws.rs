//! AWS IAM implementation over `aws-sdk-iam`.

use aws_sdk_iam::error::{DisplayErrorContext, SdkError};
use metrics::counter;
use tracing::{debug, info};

use crate::{AccessKey, IamError, IamResult, IdentityProvider};

/// IAM client bound to one region and the SDK's default credential chain.
#[derive(Debug, Clone)]
pub struct AwsIam {
    client: aws_sdk_iam::Client,
}

impl AwsIam {
    pub async fn from_env(region: &str) -> Self {
        let conf = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        info!(region = %region, "IAM client initialized");
        Self { client: aws_sdk_iam::Client::new(&conf) }
    }
}

fn classify<E, R>(op: &'static str, err: SdkError<E, R>) -> IamError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => IamError::Api { op, message },
        _ => IamError::Transport { op, message },
    }
}

fn mutated(op: &'static str) { counter!("iam_mutations_total", 1u64, "op" => op); }

#[async_trait::async_trait]
impl IdentityProvider for AwsIam {
    async fn user_exists(&self, user: &str) -> IamResult<bool> {
        match self.client.get_user().user_name(user).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_no_such_entity_exception()).unwrap_or(false) => Ok(false),
            Err(e) => Err(classify("GetUser", e)),
        }
    }

    async fn has_login_profile(&self, user: &str) -> IamResult<bool> {
        match self.client.get_login_profile().user_name(user).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_no_such_entity_exception()).unwrap_or(false) => Ok(false),
            Err(e) => Err(classify("GetLoginProfile", e)),
        }
    }

    async fn has_access_key(&self, user: &str) -> IamResult<bool> {
        let out = self.client.list_access_keys().user_name(user).send().await.map_err(|e| classify("ListAccessKeys", e))?;
        Ok(!out.access_key_metadata().is_empty())
    }

    async fn list_groups(&self, user: &str) -> IamResult<Vec<String>> {
        let mut groups = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let out = self
                .client
                .list_groups_for_user()
                .user_name(user)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify("ListGroupsForUser", e))?;
            groups.extend(out.groups().iter().map(|g| g.group_name().to_string()));
            match (out.is_truncated(), out.marker()) {
                (true, Some(m)) => marker = Some(m.to_string()),
                _ => break,
            }
        }
        Ok(groups)
    }

    async fn create_user_if_absent(&self, user: &str) -> IamResult<()> {
        match self.client.create_user().user_name(user).send().await {
            Ok(_) => {
                mutated("CreateUser");
                Ok(())
            }
            Err(e) if e.as_service_error().map(|s| s.is_entity_already_exists_exception()).unwrap_or(false) => {
                debug!(user = %user, "user already exists");
                Ok(())
            }
            Err(e) => Err(classify("CreateUser", e)),
        }
    }

    async fn create_login_profile_if_absent(&self, password: &str, user: &str, reset_required: bool) -> IamResult<()> {
        let res = self
            .client
            .create_login_profile()
            .user_name(user)
            .password(password)
            .password_reset_required(reset_required)
            .send()
            .await;
        match res {
            Ok(_) => {
                mutated("CreateLoginProfile");
                Ok(())
            }
            Err(e) if e.as_service_error().map(|s| s.is_entity_already_exists_exception()).unwrap_or(false) => {
                debug!(user = %user, "login profile already exists");
                Ok(())
            }
            Err(e) => Err(classify("CreateLoginProfile", e)),
        }
    }

    async fn create_access_key(&self, user: &str) -> IamResult<AccessKey> {
        let out = self.client.create_access_key().user_name(user).send().await.map_err(|e| classify("CreateAccessKey", e))?;
        mutated("CreateAccessKey");
        let key = out.access_key().ok_or(IamError::MissingField { op: "CreateAccessKey", field: "AccessKey" })?;
        Ok(AccessKey { id: key.access_key_id().to_string(), secret: key.secret_access_key().to_string() })
    }

    async fn add_to_group(&self, group: &str, user: &str) -> IamResult<()> {
        self.client
            .add_user_to_group()
            .group_name(group)
            .user_name(user)
            .send()
            .await
            .map_err(|e| classify("AddUserToGroup", e))?;
        mutated("AddUserToGroup");
        Ok(())
    }

    async fn remove_from_group(&self, group: &str, user: &str) -> IamResult<()> {
        self.client
            .remove_user_from_group()
            .group_name(group)
            .user_name(user)
            .send()
            .await
            .map_err(|e| classify("RemoveUserFromGroup", e))?;
        mutated("RemoveUserFromGroup");
        Ok(())
    }
}
