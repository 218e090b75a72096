//! Acting users, their profiles, and mutation authorization.
//!
//! Authentication happens at the API edge and yields an [`Actor`]. Authorization is evaluated by
//! the controller before any other step of an operation, through the [`Authorizer`] seam.

use crate::error::{SubrecordError, SubrecordResult};
use opal_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// An authenticated user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub username: NonEmptyText,
}

impl User {
    pub fn new(username: impl AsRef<str>) -> SubrecordResult<Self> {
        Ok(Self {
            username: NonEmptyText::new(username)?,
        })
    }
}

/// Whoever issued a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    Authenticated(User),
}

impl Actor {
    /// Returns the authenticated user, or [`SubrecordError::Unauthenticated`].
    pub fn user(&self) -> SubrecordResult<&User> {
        match self {
            Actor::Authenticated(user) => Ok(user),
            Actor::Anonymous => Err(SubrecordError::Unauthenticated),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Retrieve,
    Create,
    Update,
    Destroy,
}

impl Operation {
    pub fn is_mutation(self) -> bool {
        !matches!(self, Operation::Retrieve)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Retrieve => "retrieve",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Destroy => "destroy",
        };
        f.write_str(verb)
    }
}

/// Per-user settings the client reads at login.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub can_extract: bool,
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<String, Vec<String>>,
}

fn default_roles() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([("default".to_string(), Vec::new())])
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            readonly: false,
            can_extract: false,
            filters: Vec::new(),
            roles: default_roles(),
        }
    }
}

pub trait UserDirectory: Send + Sync {
    /// The profile of `user`; users without a stored profile get the default one.
    fn profile(&self, user: &User) -> SubrecordResult<UserProfile>;
}

#[derive(Deserialize)]
struct StoredProfile {
    username: NonEmptyText,
    #[serde(flatten)]
    profile: UserProfile,
}

/// User profiles loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct InMemoryUserDirectory {
    profiles: HashMap<NonEmptyText, UserProfile>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, username: NonEmptyText, profile: UserProfile) -> Self {
        self.profiles.insert(username, profile);
        self
    }

    /// Parses a YAML list of `{username, readonly, can_extract, filters, roles}` entries.
    pub fn from_yaml(yaml: &str) -> SubrecordResult<Self> {
        let stored: Vec<StoredProfile> =
            serde_yaml::from_str(yaml).map_err(SubrecordError::YamlDeserialization)?;
        let profiles = stored
            .into_iter()
            .map(|entry| (entry.username, entry.profile))
            .collect();
        Ok(Self { profiles })
    }

    pub fn load(path: &Path) -> SubrecordResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(SubrecordError::FileRead)?;
        Self::from_yaml(&yaml)
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn profile(&self, user: &User) -> SubrecordResult<UserProfile> {
        Ok(self
            .profiles
            .get(&user.username)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied,
}

pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        user: &User,
        operation: Operation,
        record_type: &str,
    ) -> SubrecordResult<Authorization>;
}

/// Denies every mutation to users whose profile is readonly.
#[derive(Clone)]
pub struct ProfileAuthorizer {
    users: Arc<dyn UserDirectory>,
}

impl ProfileAuthorizer {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }
}

impl Authorizer for ProfileAuthorizer {
    fn authorize(
        &self,
        user: &User,
        operation: Operation,
        _record_type: &str,
    ) -> SubrecordResult<Authorization> {
        if operation.is_mutation() && self.users.profile(user)?.readonly {
            return Ok(Authorization::Denied);
        }
        Ok(Authorization::Allowed)
    }
}
