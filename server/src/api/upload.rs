//! Chunked upload endpoints: init, per-chunk upload, status, finalize.

use std::collections::BTreeMap;
use std::io;

use anyhow::anyhow;
use axum::body::Body;
use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use futures::StreamExt;
use tokio_util::io::StreamReader;
use tracing::instrument;

use ctrans::api::upload::{
    ChunkStatusResponse, UploadCompleteResponse, UploadInitRequest, UploadInitResponse,
    UploadStatusResponse,
};

use crate::disk;
use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::store::resolve_under_root;
use crate::State;

/// Creates an upload session.
///
/// The destination name is validated against the upload root here so a
/// finalize can never be tricked into writing outside it, and the
/// free-space probe runs before any state is allocated.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn init_upload(
    Extension(state): Extension<State>,
    Json(request): Json<UploadInitRequest>,
) -> ServerResult<Json<UploadInitResponse>> {
    resolve_under_root(&state.config.upload_dir, &request.file_name)
        .ok_or_else(|| ServerError::request_error(anyhow!("Invalid file name")))?;

    disk::ensure_capacity(&state.config.upload_dir, request.total_size)
        .map_err(ErrorKind::InsufficientStorage)?;

    let file_id = state
        .sessions
        .create(&request.file_name, request.total_size)
        .await;

    state
        .store
        .create_session_dir(&file_id)
        .await
        .map_err(ServerError::storage_error)?;

    tracing::info!(
        %file_id,
        file_name = %request.file_name,
        total_size = request.total_size,
        "upload session created"
    );

    Ok(Json(UploadInitResponse {
        file_id,
        status: "initialized".to_string(),
    }))
}

/// Accepts one raw chunk body.
///
/// Re-uploading an index that is already staged drains the body and
/// replies 200, which makes the operation idempotent at the index
/// level. The body hash is computed while streaming but only logged;
/// acceptance rests on the whole-file checksum at finalize.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn upload_chunk(
    Extension(state): Extension<State>,
    Path((file_id, index)): Path<(String, u32)>,
    body: Body,
) -> ServerResult<StatusCode> {
    let session = state
        .sessions
        .snapshot(&file_id)
        .await
        .ok_or(ErrorKind::NoSuchSession)?;

    if index >= session.total_chunks {
        return Err(ServerError::request_error(anyhow!(
            "chunk index {index} out of range for {} chunks",
            session.total_chunks
        )));
    }

    let stream = body.into_data_stream();
    let mut stream = StreamReader::new(
        stream.map(|r| r.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))),
    );

    if session.uploaded.contains(&index) {
        tokio::io::copy(&mut stream, &mut tokio::io::sink())
            .await
            .map_err(ServerError::request_error)?;
        return Ok(StatusCode::OK);
    }

    let (hash, size) = state
        .store
        .put_chunk(&file_id, index, stream)
        .await
        .map_err(ServerError::storage_error)?;

    tracing::debug!(%file_id, index, size, %hash, "chunk staged");

    if !state.sessions.mark_uploaded(&file_id, index).await {
        return Err(ErrorKind::NoSuchSession.into());
    }

    Ok(StatusCode::OK)
}

/// Returns the session record.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn upload_status(
    Extension(state): Extension<State>,
    Path(file_id): Path<String>,
) -> ServerResult<Json<UploadStatusResponse>> {
    let snapshot = state
        .sessions
        .snapshot(&file_id)
        .await
        .ok_or(ErrorKind::NoSuchSession)?;

    Ok(Json(snapshot))
}

/// Reports presence, size and hash of every chunk slot.
///
/// Hashes are computed on demand from the staged files, so a resuming
/// client sees the server's actual bytes rather than whatever a prior
/// run recorded.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn chunk_status(
    Extension(state): Extension<State>,
    Path(file_id): Path<String>,
) -> ServerResult<Json<ChunkStatusResponse>> {
    let session = state
        .sessions
        .snapshot(&file_id)
        .await
        .ok_or(ErrorKind::NoSuchSession)?;

    let mut chunks = BTreeMap::new();
    for index in 0..session.total_chunks {
        chunks.insert(index, state.store.chunk_status(&file_id, index).await);
    }

    Ok(Json(ChunkStatusResponse {
        file_id: session.file_id,
        file_name: session.file_name,
        total_size: session.total_size,
        total_chunks: session.total_chunks,
        chunk_size: session.chunk_size,
        chunks,
    }))
}

/// Assembles the staged chunks into the destination file.
///
/// Finalize is serialized per session; a second caller blocks on the
/// session mutex and then short-circuits on the completed flag, getting
/// the same checksum without re-assembling. On an I/O failure the
/// session stays incomplete and the staging directory is kept so the
/// call can be retried.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn complete_upload(
    Extension(state): Extension<State>,
    Path(file_id): Path<String>,
) -> ServerResult<Json<UploadCompleteResponse>> {
    let lock = state
        .sessions
        .finalize_lock(&file_id)
        .await
        .ok_or(ErrorKind::NoSuchSession)?;
    let _guard = lock.lock().await;

    let session = state
        .sessions
        .snapshot(&file_id)
        .await
        .ok_or(ErrorKind::NoSuchSession)?;

    if session.completed {
        return Ok(Json(UploadCompleteResponse {
            status: "completed".to_string(),
            checksum: session.checksum.unwrap_or_default(),
        }));
    }

    if session.uploaded.len() as u32 != session.total_chunks {
        return Err(ServerError::request_error(anyhow!(
            "Not all chunks uploaded: {} of {}",
            session.uploaded.len(),
            session.total_chunks
        )));
    }

    let dest = resolve_under_root(&state.config.upload_dir, &session.file_name)
        .ok_or_else(|| ServerError::request_error(anyhow!("Invalid file name")))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ServerError::storage_error)?;
    }

    let checksum = state
        .store
        .assemble(&file_id, session.total_chunks, &dest)
        .await
        .map_err(ServerError::storage_error)?;

    state.sessions.mark_completed(&file_id, &checksum).await;

    if let Err(err) = state.store.remove_session(&file_id).await {
        tracing::warn!(%file_id, "failed to remove staging directory: {err}");
    }

    tracing::info!(%file_id, %checksum, "upload finalized");

    Ok(Json(UploadCompleteResponse {
        status: "completed".to_string(),
        checksum,
    }))
}
