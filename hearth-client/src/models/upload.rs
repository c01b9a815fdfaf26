use serde::{Deserialize, Serialize};
use url::Url;

/// An upload record as returned by the upload endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRecord {
    /// Unique identifier.
    pub id: u64,

    /// Original file name.
    pub name: String,

    /// Size in bytes.
    #[serde(default)]
    pub byte_size: Option<u64>,

    /// MIME type reported by the server.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Direct download URL.
    #[serde(default)]
    pub full_url: Option<Url>,

    /// Creation timestamp as reported by the server.
    #[serde(default)]
    pub created_at: Option<String>,

    /// Room the file was uploaded to.
    #[serde(default)]
    pub room_id: Option<u64>,

    /// User who uploaded the file.
    #[serde(default)]
    pub user_id: Option<u64>,
}
