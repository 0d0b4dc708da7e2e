//! In-memory identity provider with a call log and failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{AccessKey, IamError, IamResult, IdentityProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IamOp {
    UserExists,
    HasLoginProfile,
    HasAccessKey,
    ListGroups,
    CreateUser,
    CreateLoginProfile,
    CreateAccessKey,
    AddToGroup,
    RemoveFromGroup,
}

impl IamOp {
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            IamOp::CreateUser | IamOp::CreateLoginProfile | IamOp::CreateAccessKey | IamOp::AddToGroup | IamOp::RemoveFromGroup
        )
    }

    fn name(self) -> &'static str {
        match self {
            IamOp::UserExists => "GetUser",
            IamOp::HasLoginProfile => "GetLoginProfile",
            IamOp::HasAccessKey => "ListAccessKeys",
            IamOp::ListGroups => "ListGroupsForUser",
            IamOp::CreateUser => "CreateUser",
            IamOp::CreateLoginProfile => "CreateLoginProfile",
            IamOp::CreateAccessKey => "CreateAccessKey",
            IamOp::AddToGroup => "AddUserToGroup",
            IamOp::RemoveFromGroup => "RemoveUserFromGroup",
        }
    }
}

/// One recorded provider call. `group` is set for membership calls only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IamCall {
    pub op: IamOp,
    pub user: String,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct MemUser {
    login_profile: Option<LoginProfile>,
    access_keys: Vec<AccessKey>,
    groups: Vec<String>,
}

#[derive(Debug, Clone)]
struct LoginProfile {
    password: String,
    reset_required: bool,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<String, MemUser>,
    calls: Vec<IamCall>,
    failures: HashMap<IamOp, usize>,
    next_key: u64,
}

/// Provider double keeping users, profiles, keys and memberships in RAM.
#[derive(Debug, Default)]
pub struct MemoryIam {
    state: Mutex<State>,
}

impl MemoryIam {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Make the next call of `op` fail with a provider error.
    pub fn fail_once(&self, op: IamOp) { *self.state().failures.entry(op).or_insert(0) += 1; }

    /// Seed a user out-of-band, as if created by someone else.
    pub fn seed_user(&self, user: &str, groups: &[&str]) {
        let mut st = self.state();
        let u = st.users.entry(user.to_string()).or_default();
        u.groups = groups.iter().map(|g| g.to_string()).collect();
    }

    /// Remove a user out-of-band.
    pub fn delete_user(&self, user: &str) { self.state().users.remove(user); }

    pub fn calls(&self) -> Vec<IamCall> { self.state().calls.clone() }

    pub fn clear_calls(&self) { self.state().calls.clear(); }

    pub fn count(&self, op: IamOp) -> usize { self.state().calls.iter().filter(|c| c.op == op).count() }

    pub fn mutations(&self) -> usize { self.state().calls.iter().filter(|c| c.op.is_mutation()).count() }

    pub fn user_exists_now(&self, user: &str) -> bool { self.state().users.contains_key(user) }

    pub fn groups_of(&self, user: &str) -> Vec<String> {
        self.state().users.get(user).map(|u| u.groups.clone()).unwrap_or_default()
    }

    /// Password and reset flag of the user's login profile, if any.
    pub fn login_profile(&self, user: &str) -> Option<(String, bool)> {
        self.state()
            .users
            .get(user)
            .and_then(|u| u.login_profile.as_ref())
            .map(|p| (p.password.clone(), p.reset_required))
    }

    pub fn access_keys(&self, user: &str) -> Vec<AccessKey> {
        self.state().users.get(user).map(|u| u.access_keys.clone()).unwrap_or_default()
    }

    fn enter(&self, op: IamOp, user: &str, group: Option<&str>) -> IamResult<MutexGuard<'_, State>> {
        let mut st = self.state();
        st.calls.push(IamCall { op, user: user.to_string(), group: group.map(|g| g.to_string()) });
        if let Some(n) = st.failures.get_mut(&op) {
            if *n > 0 {
                *n -= 1;
                return Err(IamError::Api { op: op.name(), message: "injected failure".to_string() });
            }
        }
        Ok(st)
    }
}

fn no_such_user(op: IamOp, user: &str) -> IamError {
    IamError::Api { op: op.name(), message: format!("NoSuchEntity: user {} not found", user) }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryIam {
    async fn user_exists(&self, user: &str) -> IamResult<bool> {
        let st = self.enter(IamOp::UserExists, user, None)?;
        Ok(st.users.contains_key(user))
    }

    async fn has_login_profile(&self, user: &str) -> IamResult<bool> {
        let st = self.enter(IamOp::HasLoginProfile, user, None)?;
        Ok(st.users.get(user).map(|u| u.login_profile.is_some()).unwrap_or(false))
    }

    async fn has_access_key(&self, user: &str) -> IamResult<bool> {
        let st = self.enter(IamOp::HasAccessKey, user, None)?;
        st.users.get(user).map(|u| !u.access_keys.is_empty()).ok_or_else(|| no_such_user(IamOp::HasAccessKey, user))
    }

    async fn list_groups(&self, user: &str) -> IamResult<Vec<String>> {
        let st = self.enter(IamOp::ListGroups, user, None)?;
        st.users.get(user).map(|u| u.groups.clone()).ok_or_else(|| no_such_user(IamOp::ListGroups, user))
    }

    async fn create_user_if_absent(&self, user: &str) -> IamResult<()> {
        let mut st = self.enter(IamOp::CreateUser, user, None)?;
        st.users.entry(user.to_string()).or_default();
        Ok(())
    }

    async fn create_login_profile_if_absent(&self, password: &str, user: &str, reset_required: bool) -> IamResult<()> {
        let mut st = self.enter(IamOp::CreateLoginProfile, user, None)?;
        let u = st.users.get_mut(user).ok_or_else(|| no_such_user(IamOp::CreateLoginProfile, user))?;
        if u.login_profile.is_none() {
            u.login_profile = Some(LoginProfile { password: password.to_string(), reset_required });
        }
        Ok(())
    }

    async fn create_access_key(&self, user: &str) -> IamResult<AccessKey> {
        let mut st = self.enter(IamOp::CreateAccessKey, user, None)?;
        st.next_key += 1;
        let n = st.next_key;
        let u = st.users.get_mut(user).ok_or_else(|| no_such_user(IamOp::CreateAccessKey, user))?;
        let key = AccessKey { id: format!("AKIAMEMORY{:010}", n), secret: format!("memory-secret-{}", n) };
        u.access_keys.push(key.clone());
        Ok(key)
    }

    async fn add_to_group(&self, group: &str, user: &str) -> IamResult<()> {
        let mut st = self.enter(IamOp::AddToGroup, user, Some(group))?;
        let u = st.users.get_mut(user).ok_or_else(|| no_such_user(IamOp::AddToGroup, user))?;
        if !u.groups.iter().any(|g| g == group) {
            u.groups.push(group.to_string());
        }
        Ok(())
    }

    async fn remove_from_group(&self, group: &str, user: &str) -> IamResult<()> {
        let mut st = self.enter(IamOp::RemoveFromGroup, user, Some(group))?;
        let u = st.users.get_mut(user).ok_or_else(|| no_such_user(IamOp::RemoveFromGroup, user))?;
        u.groups.retain(|g| g != group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let iam = MemoryIam::new();
        iam.create_user_if_absent("u").await.unwrap();
        iam.create_user_if_absent("u").await.unwrap();
        iam.create_login_profile_if_absent("first", "u", true).await.unwrap();
        iam.create_login_profile_if_absent("second", "u", false).await.unwrap();
        assert_eq!(iam.login_profile("u"), Some(("first".to_string(), true)));
        assert_eq!(iam.count(IamOp::CreateUser), 2);
    }

    #[tokio::test]
    async fn queries_on_missing_user() {
        let iam = MemoryIam::new();
        assert!(!iam.user_exists("ghost").await.unwrap());
        assert!(!iam.has_login_profile("ghost").await.unwrap());
        assert!(iam.list_groups("ghost").await.is_err());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let iam = MemoryIam::new();
        iam.fail_once(IamOp::CreateUser);
        let err = iam.create_user_if_absent("u").await.unwrap_err();
        assert_eq!(err.op(), "CreateUser");
        assert!(!iam.user_exists_now("u"));
        iam.create_user_if_absent("u").await.unwrap();
        assert!(iam.user_exists_now("u"));
    }

    #[tokio::test]
    async fn membership_calls_are_recorded() {
        let iam = MemoryIam::new();
        iam.seed_user("u", &["a"]);
        iam.add_to_group("b", "u").await.unwrap();
        iam.add_to_group("b", "u").await.unwrap();
        iam.remove_from_group("a", "u").await.unwrap();
        assert_eq!(iam.groups_of("u"), vec!["b".to_string()]);
        let calls = iam.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], IamCall { op: IamOp::RemoveFromGroup, user: "u".into(), group: Some("a".into()) });
        assert_eq!(iam.mutations(), 3);
    }

    #[tokio::test]
    async fn access_keys_are_unique() {
        let iam = MemoryIam::new();
        iam.seed_user("u", &[]);
        let a = iam.create_access_key("u").await.unwrap();
        let b = iam.create_access_key("u").await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(iam.has_access_key("u").await.unwrap());
    }
}
