//! Repository, account and credential shapes shared by every forge.

use serde::{Deserialize, Serialize};

/// Repository visibility as reported by the forge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    Private,
}

impl Visibility {
    /// Map a forge's private flag to a visibility.
    pub fn from_private(private: bool) -> Self {
        if private {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

/// Access a user has on a repository.
///
/// The three flags are independent; adapters set each one explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub pull: bool,
    pub push: bool,
    pub admin: bool,
}

impl Permission {
    pub fn new(pull: bool, push: bool, admin: bool) -> Self {
        Self { pull, push, admin }
    }
}

/// Canonical repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    pub forge_remote_id: String,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub avatar: String,
    /// Web URL of the repository
    pub forge_url: String,
    pub clone: String,
    pub clone_ssh: String,
    pub default_branch: String,
    pub visibility: Visibility,
    pub perm: Option<Permission>,
    pub pr_enabled: bool,
    /// User-declared config path; empty means use the conventional locations.
    pub config_path: String,
    pub config_endpoint: Option<String>,
    pub secret_endpoint: Option<String>,
    pub registry_endpoint: Option<String>,
}

impl Repo {
    /// Create a new repo with owner and name set.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let mut repo = Repo {
            owner: owner.into(),
            name: name.into(),
            ..Default::default()
        };
        repo.ensure_full_name();
        repo
    }

    /// Fill `full_name` from `owner/name` when the payload left it empty.
    pub fn ensure_full_name(&mut self) {
        if self.full_name.is_empty() && !self.owner.is_empty() && !self.name.is_empty() {
            self.full_name = format!("{}/{}", self.owner, self.name);
        }
    }

    /// Split a `group/sub/name` path into owner and name on the last `/`.
    pub fn split_full_name(full_name: &str) -> (String, String) {
        match full_name.rsplit_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => (String::new(), full_name.to_string()),
        }
    }

    pub fn is_private(&self) -> bool {
        self.visibility != Visibility::Public
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_config_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_secret_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.secret_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_registry_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.registry_endpoint = Some(endpoint.into());
        self
    }
}

/// An authenticated forge account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub login: String,
    pub email: String,
    pub avatar: String,
    pub forge_remote_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    /// Token expiry as unix seconds, 0 when unknown
    pub expiry: i64,
}

impl User {
    /// Create a user that authenticates with a personal access token.
    pub fn with_token(login: impl Into<String>, token: impl Into<String>) -> Self {
        User {
            login: login.into(),
            access_token: token.into(),
            ..Default::default()
        }
    }
}

/// An organization, group or workspace the user belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub login: String,
    pub avatar: String,
}

/// A commit reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub forge_url: String,
}

/// Credentials written to the clone step's `.netrc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetrcCredential {
    /// Host of the clone URL
    pub machine: String,
    pub login: String,
    pub password: String,
}

impl NetrcCredential {
    /// Build credentials for `clone_url`'s host. Login and password stay
    /// empty when no user is given.
    pub fn for_clone_url(
        clone_url: &str,
        credentials: Option<(String, String)>,
    ) -> crate::ForgeResult<Self> {
        let parsed = url::Url::parse(clone_url).map_err(|e| {
            crate::ForgeError::MalformedPayload(format!("clone url {clone_url}: {e}"))
        })?;
        let machine = parsed.host_str().unwrap_or_default().to_string();
        let (login, password) = credentials.unwrap_or_default();
        Ok(Self {
            machine,
            login,
            password,
        })
    }
}
