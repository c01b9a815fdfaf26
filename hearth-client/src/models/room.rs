use serde::{Deserialize, Serialize};

use super::user::User;

/// A room as returned by the directory and single-room endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomInfo {
    /// Unique identifier.
    pub id: u64,

    /// Room name.
    pub name: String,

    /// Current topic, if one is set.
    #[serde(default)]
    pub topic: Option<String>,

    /// Maximum simultaneous members.
    #[serde(default)]
    pub membership_limit: Option<u32>,

    /// Whether the room is at its membership limit.
    #[serde(default)]
    pub full: Option<bool>,

    /// Whether guests may enter through a public invite link.
    #[serde(default)]
    pub open_to_guests: Option<bool>,

    /// Whether the room is currently locked.
    #[serde(default)]
    pub locked: Option<bool>,

    /// Creation timestamp as reported by the server.
    #[serde(default)]
    pub created_at: Option<String>,

    /// Last-update timestamp as reported by the server.
    #[serde(default)]
    pub updated_at: Option<String>,

    /// Present occupants; only populated on single-room payloads.
    #[serde(default)]
    pub users: Option<Vec<User>>,
}
