//! Types for the file listing endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the `GET /files` listing.
///
/// `path` is relative to the upload root and always uses forward
/// slashes, regardless of the server's platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}
