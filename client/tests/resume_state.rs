//! Integration tests for the local session store and resume planning.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use ctrans::api::upload::{ChunkStatus, ChunkStatusResponse};
use ctrans::chunking::{chunk_span, total_chunks, CHUNK_SIZE};
use ctrans_client::planner::plan_resume;
use ctrans_client::state::{StateStore, UploadState};

fn sample_state(dir: &TempDir) -> UploadState {
    UploadState::new(
        "0123456789abcdef".to_string(),
        "data.bin".to_string(),
        dir.path().join("data.bin"),
        "http://localhost:8080".to_string(),
        25 * 1024 * 1024,
    )
}

#[tokio::test]
async fn records_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).unwrap();

    let mut state = sample_state(&dir);
    state.uploaded.insert(0);
    state.uploaded.insert(2);
    store.save(&mut state).await.unwrap();

    let loaded = store.load(&state.file_id).unwrap();
    assert_eq!(loaded.file_id, state.file_id);
    assert_eq!(loaded.total_chunks, 3);
    assert_eq!(loaded.uploaded, state.uploaded);
    assert!(!loaded.completed);

    store.delete(&state.file_id).await.unwrap();
    assert!(store.load(&state.file_id).is_none());
}

#[tokio::test]
async fn empty_session_id_is_refused() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).unwrap();

    let mut state = sample_state(&dir);
    state.file_id.clear();

    assert!(store.save(&mut state).await.is_err());
}

#[tokio::test]
async fn record_json_uses_wire_field_names() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).unwrap();

    let mut state = sample_state(&dir);
    state.uploaded.insert(1);
    store.save(&mut state).await.unwrap();

    let raw = std::fs::read_to_string(
        dir.path()
            .join("state")
            .join(format!("{}.json", state.file_id)),
    )
    .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(json["uploaded_chunks"], serde_json::json!([1]));
    assert_eq!(json["server_addr"], "http://localhost:8080");
    assert!(json["file_path"].as_str().unwrap().ends_with("data.bin"));
    // no checksum until the upload completes
    assert!(json.get("checksum").is_none());
}

/// A killed client leaves a record with some chunks uploaded; the next
/// run's plan must contain exactly the rest.
#[test]
fn interrupted_upload_plans_only_the_remainder() {
    let total_size = 2 * CHUNK_SIZE + 1234;
    let data: Vec<u8> = (0..total_size).map(|i| (i % 251) as u8).collect();

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&data).unwrap();
    let file = tmp.reopen().unwrap();

    // the server staged chunk 0 before the crash
    let mut chunks = BTreeMap::new();
    for index in 0..total_chunks(total_size) {
        let (start, len) = chunk_span(index, total_size);
        let slice = &data[start as usize..(start + len) as usize];
        let status = if index == 0 {
            ChunkStatus {
                exists: true,
                size: len,
                hash: Some(hex::encode(Sha256::digest(slice))),
            }
        } else {
            ChunkStatus::default()
        };
        chunks.insert(index, status);
    }

    let report = ChunkStatusResponse {
        file_id: "feedfacefeedface".to_string(),
        file_name: "data.bin".to_string(),
        total_size,
        total_chunks: total_chunks(total_size),
        chunk_size: CHUNK_SIZE,
        chunks,
    };

    let needed = plan_resume(&file, &report).unwrap();
    assert_eq!(needed, vec![1, 2]);
}

#[tokio::test]
async fn find_incomplete_skips_foreign_records() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path().join("state")).unwrap();

    // a record for a different server must never be resumed, so the
    // scan never reaches the probe for it
    let mut other = sample_state(&dir);
    other.file_id = "aaaaaaaaaaaaaaaa".to_string();
    other.server_addr = "http://elsewhere:9999".to_string();
    store.save(&mut other).await.unwrap();

    let api = ctrans_client::api::ApiClient::new("localhost:8080", None).unwrap();
    let found = store
        .find_incomplete(
            &PathBuf::from("/nonexistent/data.bin"),
            "http://localhost:8080",
            &api,
        )
        .await
        .unwrap();

    assert!(found.is_none());
    // the foreign record is left alone
    assert!(store.load("aaaaaaaaaaaaaaaa").is_some());
}
