//! Types for the chunked upload endpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to create an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitRequest {
    /// Destination name, relative to the server's upload root.
    pub file_name: String,

    /// Declared length of the file in bytes.
    pub total_size: u64,
}

/// Response from creating an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitResponse {
    /// The 16-hex session id. Carried in every session-scoped path.
    pub file_id: String,

    /// Always `"initialized"`.
    pub status: String,
}

/// A session record as reported by `GET /upload/status/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
    #[serde(rename = "uploaded_chunks")]
    pub uploaded: Vec<u32>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Presence, size and content hash of one staged chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStatus {
    pub exists: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Response from `GET /upload/status/{id}/chunks`.
///
/// `chunks` has one entry per index in `0..total_chunks`. This report is
/// the synchronization point for resume: the client hashes its local
/// chunks and re-sends every index whose server copy is absent or stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStatusResponse {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub chunks: BTreeMap<u32, ChunkStatus>,
}

/// Response from `POST /upload/complete/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCompleteResponse {
    /// Always `"completed"`.
    pub status: String,

    /// Hex SHA-256 of the assembled file.
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_map_uses_string_keys() {
        let mut chunks = BTreeMap::new();
        chunks.insert(
            0u32,
            ChunkStatus {
                exists: true,
                size: 42,
                hash: Some("abcd".to_string()),
            },
        );
        let report = ChunkStatusResponse {
            file_id: "0123456789abcdef".to_string(),
            file_name: "a.bin".to_string(),
            total_size: 42,
            total_chunks: 1,
            chunk_size: 10 * 1024 * 1024,
            chunks,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["chunks"]["0"]["exists"].as_bool().unwrap());
        assert_eq!(json["chunks"]["0"]["size"].as_u64().unwrap(), 42);
    }

    #[test]
    fn checksum_omitted_until_set() {
        let status = UploadStatusResponse {
            file_id: "0123456789abcdef".to_string(),
            file_name: "a.bin".to_string(),
            total_size: 0,
            total_chunks: 0,
            chunk_size: 10 * 1024 * 1024,
            uploaded: Vec::new(),
            start_time: Utc::now(),
            last_update: Utc::now(),
            completed: false,
            checksum: None,
        };

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("checksum").is_none());
        assert!(json.get("uploaded_chunks").is_some());
    }
}
