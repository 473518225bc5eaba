//! Local session records.
//!
//! One JSON file per in-flight upload under `.upload_state/`, named by
//! the server-issued session id. A process-wide mutex serializes
//! writers; concurrent processes are not supported.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use ctrans::chunking::total_chunks;

use crate::api::ApiClient;

/// Default record directory, relative to the working directory.
pub const STATE_DIR: &str = ".upload_state";

/// A persisted upload record.
///
/// Mirrors the server's session record and additionally binds it to the
/// local source file and target server so a later invocation can find
/// it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadState {
    pub file_id: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub server_addr: String,
    pub total_size: u64,
    pub total_chunks: u32,
    #[serde(rename = "uploaded_chunks")]
    pub uploaded: HashSet<u32>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl UploadState {
    pub fn new(
        file_id: String,
        file_name: String,
        file_path: PathBuf,
        server_addr: String,
        total_size: u64,
    ) -> Self {
        let now = Utc::now();

        Self {
            file_id,
            file_name,
            file_path,
            server_addr,
            total_size,
            total_chunks: total_chunks(total_size),
            uploaded: HashSet::new(),
            start_time: now,
            last_update: now,
            completed: false,
            checksum: None,
        }
    }
}

/// Directory of local session records.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{file_id}.json"))
    }

    /// Persists the record, refreshing its `last_update` stamp.
    ///
    /// Records with an empty session id are refused: such a record could
    /// never be matched to a server session again.
    pub async fn save(&self, state: &mut UploadState) -> Result<()> {
        if state.file_id.is_empty() {
            bail!("cannot save a record with an empty session id");
        }

        state.last_update = Utc::now();

        let _guard = self.write_lock.lock().await;
        let data = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(self.record_path(&state.file_id), data).await?;

        Ok(())
    }

    /// Loads one record by session id.
    pub fn load(&self, file_id: &str) -> Option<UploadState> {
        let data = std::fs::read(self.record_path(file_id)).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Deletes a record file.
    pub async fn delete(&self, file_id: &str) -> io::Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::remove_file(self.record_path(file_id)).await
    }

    /// Finds a resumable record for (`file_path`, `server_addr`).
    ///
    /// Invalid records and records with an empty session id are deleted
    /// as they are encountered. A matching record is only returned if
    /// the server still knows the session; a 404 from the probe deletes
    /// the stale record.
    pub async fn find_incomplete(
        &self,
        file_path: &Path,
        server_addr: &str,
        api: &ApiClient,
    ) -> Result<Option<UploadState>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let state: UploadState = match std::fs::read(&path)
                .ok()
                .and_then(|data| serde_json::from_slice(&data).ok())
            {
                Some(state) => state,
                None => {
                    tracing::warn!("removing unreadable record {}", path.display());
                    let _ = std::fs::remove_file(&path);
                    continue;
                }
            };

            if state.file_id.is_empty() {
                tracing::warn!("removing record with empty session id {}", path.display());
                let _ = std::fs::remove_file(&path);
                continue;
            }

            if state.file_path != file_path || state.server_addr != server_addr || state.completed
            {
                continue;
            }

            match api.chunk_status(&state.file_id).await {
                Ok(Some(report)) if report.file_id == state.file_id => return Ok(Some(state)),
                Ok(_) => {
                    tracing::warn!(
                        file_id = %state.file_id,
                        "server no longer knows this session, removing stale record"
                    );
                    let _ = std::fs::remove_file(&path);
                }
                Err(err) => {
                    tracing::warn!(file_id = %state.file_id, "failed to probe session: {err}");
                }
            }
        }

        Ok(None)
    }
}
