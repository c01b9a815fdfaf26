use serde::{Deserialize, Serialize};

/// A member or guest account as returned by the user endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique identifier.
    pub id: u64,

    /// Display name.
    pub name: String,

    /// Login email address.
    #[serde(default)]
    pub email_address: Option<String>,

    /// Whether the account has administrative rights.
    #[serde(default)]
    pub admin: Option<bool>,

    /// Creation timestamp as reported by the server.
    #[serde(default)]
    pub created_at: Option<String>,

    /// Account kind, e.g. `Member` or `Guest`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// API auth token; present only on the authenticated `users/me`
    /// payload and never re-serialized.
    #[serde(default, skip_serializing)]
    pub api_auth_token: Option<String>,
}

/// Reference to the user a message is attributed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    /// Unique identifier.
    pub id: u64,

    /// Display name, when the directory lookup succeeded.
    pub name: Option<String>,
}

impl From<&User> for UserRef {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: Some(user.name.clone()),
        }
    }
}
