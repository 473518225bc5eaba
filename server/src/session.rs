//! In-memory upload session registry.
//!
//! Sessions live for the lifetime of the process and are not persisted;
//! restarting the server orphans any staged chunk files on disk. A
//! single reader/writer lock guards the map and every record's mutable
//! fields. Chunk bodies are written to disk outside the lock; only the
//! index-set update takes it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use ctrans::api::upload::UploadStatusResponse;
use ctrans::chunking::{total_chunks, CHUNK_SIZE};

/// One in-flight upload.
#[derive(Debug)]
pub struct UploadSession {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
    uploaded: HashSet<u32>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub completed: bool,
    pub checksum: Option<String>,

    /// Serializes finalize calls for this session.
    finalize_lock: Arc<Mutex<()>>,
}

impl UploadSession {
    fn new(file_id: String, file_name: String, total_size: u64) -> Self {
        let now = Utc::now();

        Self {
            file_id,
            file_name,
            total_size,
            total_chunks: total_chunks(total_size),
            chunk_size: CHUNK_SIZE,
            uploaded: HashSet::new(),
            start_time: now,
            last_update: now,
            completed: false,
            checksum: None,
            finalize_lock: Arc::new(Mutex::new(())),
        }
    }

    fn snapshot(&self) -> UploadStatusResponse {
        let mut uploaded: Vec<u32> = self.uploaded.iter().copied().collect();
        uploaded.sort_unstable();

        UploadStatusResponse {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            total_size: self.total_size,
            total_chunks: self.total_chunks,
            chunk_size: self.chunk_size,
            uploaded,
            start_time: self.start_time,
            last_update: self.last_update,
            completed: self.completed,
            checksum: self.checksum.clone(),
        }
    }
}

/// Owns all live session records.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session and returns its id.
    ///
    /// The id is the first 16 hex characters of
    /// `SHA-256(file_name ‖ total_size ‖ now)`, which keeps ids stable
    /// in length while remaining unique per init call.
    pub async fn create(&self, file_name: &str, total_size: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_name.as_bytes());
        hasher.update(total_size.to_string().as_bytes());
        hasher.update(Utc::now().to_rfc3339().as_bytes());
        let file_id = hex::encode(hasher.finalize())[..16].to_string();

        let session = UploadSession::new(file_id.clone(), file_name.to_string(), total_size);

        let mut sessions = self.sessions.write().await;
        sessions.insert(file_id.clone(), session);

        file_id
    }

    /// Returns a point-in-time copy of the session record.
    pub async fn snapshot(&self, file_id: &str) -> Option<UploadStatusResponse> {
        let sessions = self.sessions.read().await;
        sessions.get(file_id).map(UploadSession::snapshot)
    }

    /// Records chunk `index` as staged. Idempotent: re-adding an index
    /// that is already present only refreshes `last_update`.
    ///
    /// Returns `false` if the session does not exist.
    pub async fn mark_uploaded(&self, file_id: &str, index: u32) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(file_id) {
            Some(session) => {
                session.uploaded.insert(index);
                session.last_update = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Returns the per-session finalize mutex.
    pub async fn finalize_lock(&self, file_id: &str) -> Option<Arc<Mutex<()>>> {
        let sessions = self.sessions.read().await;
        sessions.get(file_id).map(|s| s.finalize_lock.clone())
    }

    /// Marks the session complete with its whole-file checksum. The
    /// record becomes immutable afterwards apart from cleanup.
    pub async fn mark_completed(&self, file_id: &str, checksum: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(file_id) {
            Some(session) => {
                session.completed = true;
                session.checksum = Some(checksum.to_string());
                session.last_update = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_a_16_hex_id() {
        let registry = SessionRegistry::new();
        let id = registry.create("report.tar", 123).await;

        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let snap = registry.snapshot(&id).await.unwrap();
        assert_eq!(snap.file_name, "report.tar");
        assert_eq!(snap.total_size, 123);
        assert_eq!(snap.total_chunks, 1);
        assert_eq!(snap.chunk_size, CHUNK_SIZE);
        assert!(!snap.completed);
    }

    #[tokio::test]
    async fn zero_byte_file_has_zero_chunks() {
        let registry = SessionRegistry::new();
        let id = registry.create("empty", 0).await;

        let snap = registry.snapshot(&id).await.unwrap();
        assert_eq!(snap.total_chunks, 0);
    }

    #[tokio::test]
    async fn mark_uploaded_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = registry.create("a.bin", 25 * 1024 * 1024).await;

        assert!(registry.mark_uploaded(&id, 1).await);
        assert!(registry.mark_uploaded(&id, 1).await);
        assert!(registry.mark_uploaded(&id, 0).await);

        let snap = registry.snapshot(&id).await.unwrap();
        assert_eq!(snap.uploaded, vec![0, 1]);
    }

    #[tokio::test]
    async fn unknown_session_is_surfaced() {
        let registry = SessionRegistry::new();

        assert!(registry.snapshot("deadbeefdeadbeef").await.is_none());
        assert!(!registry.mark_uploaded("deadbeefdeadbeef", 0).await);
    }

    #[tokio::test]
    async fn completion_records_the_checksum() {
        let registry = SessionRegistry::new();
        let id = registry.create("a.bin", 10).await;
        registry.mark_uploaded(&id, 0).await;

        assert!(registry.mark_completed(&id, "cafe").await);

        let snap = registry.snapshot(&id).await.unwrap();
        assert!(snap.completed);
        assert_eq!(snap.checksum.as_deref(), Some("cafe"));
    }
}
