//! The upload engine: resume discovery, the bounded chunk pump, and
//! finalization.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_channel as channel;
use bytes::Bytes;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::sync::Mutex;

use ctrans::chunking::chunk_span;

use crate::api::ApiClient;
use crate::fileio::read_exact_at;
use crate::planner::plan_resume;
use crate::state::{StateStore, UploadState};

/// Number of concurrent chunk uploads.
const UPLOAD_CONCURRENCY: usize = 5;

/// Retries per chunk after the initial attempt fails.
const MAX_RETRIES: u32 = 3;

/// Uploads a local file, resuming a prior session when one matches.
pub async fn upload(api: &ApiClient, store: &Arc<StateStore>, file_path: &Path) -> Result<()> {
    let abs = std::fs::canonicalize(file_path)
        .with_context(|| format!("cannot open {}", file_path.display()))?;
    let server_addr = api.server_addr();

    if let Some(state) = store.find_incomplete(&abs, &server_addr, api).await? {
        eprintln!("found incomplete upload for {}", abs.display());
        eprintln!("resuming session {}", state.file_id);
        return run_upload(api, store, state).await;
    }

    let meta = std::fs::metadata(&abs)?;
    let file_name = abs
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("file name is not valid UTF-8"))?;

    let init = api.init_upload(&file_name, meta.len()).await?;
    if init.file_id.is_empty() {
        bail!("server returned an empty session id");
    }

    let mut state = UploadState::new(init.file_id, file_name, abs, server_addr, meta.len());
    store.save(&mut state).await?;

    run_upload(api, store, state).await
}

/// Resumes an upload by session id.
pub async fn resume(api: &ApiClient, store: &Arc<StateStore>, file_id: &str) -> Result<()> {
    let status = api.upload_status(file_id).await?;

    if status.completed {
        eprintln!("upload already completed");
        return Ok(());
    }

    let state = match store.load(file_id) {
        Some(state) => state,
        None => {
            // No local record; fall back to resolving the server-side
            // file name against the working directory.
            let file_path = std::fs::canonicalize(&status.file_name).with_context(|| {
                format!(
                    "no local record for session {file_id} and {} does not resolve locally",
                    status.file_name
                )
            })?;

            UploadState::new(
                file_id.to_string(),
                status.file_name.clone(),
                file_path,
                api.server_addr(),
                status.total_size,
            )
        }
    };

    run_upload(api, store, state).await
}

struct PumpShared {
    state: Mutex<UploadState>,
    errors: Mutex<Vec<(u32, String)>>,
}

async fn run_upload(api: &ApiClient, store: &Arc<StateStore>, mut state: UploadState) -> Result<()> {
    let file_id = state.file_id.clone();
    let total_size = state.total_size;

    // The server's per-chunk hashes are the authority on what still
    // needs sending; the local record only ever shrinks the plan after
    // this comparison.
    let report = api
        .chunk_status(&file_id)
        .await?
        .ok_or_else(|| anyhow!("the server no longer knows session {file_id}"))?;

    let file = Arc::new(
        File::open(&state.file_path)
            .with_context(|| format!("cannot open {}", state.file_path.display()))?,
    );

    let needed = {
        let file = file.clone();
        tokio::task::spawn_blocking(move || plan_resume(&file, &report)).await??
    };

    state.uploaded = (0..state.total_chunks)
        .filter(|index| !needed.contains(index))
        .collect();
    store.save(&mut state).await?;

    let staged: u64 = state
        .uploaded
        .iter()
        .map(|&index| chunk_span(index, total_size).1)
        .sum();

    let bar = progress_bar(&state.file_name, total_size);
    bar.inc(staged);

    if !needed.is_empty() {
        let (sender, receiver) = channel::unbounded();
        for index in &needed {
            sender.send(*index).await.map_err(|e| anyhow!(e))?;
        }
        drop(sender);

        let shared = Arc::new(PumpShared {
            state: Mutex::new(state),
            errors: Mutex::new(Vec::new()),
        });

        let mut workers = Vec::new();
        for _ in 0..UPLOAD_CONCURRENCY {
            workers.push(tokio::spawn(worker(
                receiver.clone(),
                file_id.clone(),
                total_size,
                api.clone(),
                file.clone(),
                store.clone(),
                shared.clone(),
                bar.clone(),
            )));
        }

        for worker in workers {
            let _ = worker.await;
        }

        let errors = shared.errors.lock().await;
        if !errors.is_empty() {
            bar.abandon();
            for (index, message) in errors.iter() {
                eprintln!("❌ chunk {index}: {message}");
            }
            bail!("upload failed; re-run the same command to resume");
        }
    }

    let response = api.complete_upload(&file_id).await?;
    bar.finish_and_clear();

    eprintln!("✅ upload completed ({})", HumanBytes(total_size));
    eprintln!("checksum: {}", response.checksum);

    if let Err(err) = store.delete(&file_id).await {
        tracing::warn!("failed to delete local record: {err}");
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn worker(
    jobs: channel::Receiver<u32>,
    file_id: String,
    total_size: u64,
    api: ApiClient,
    file: Arc<File>,
    store: Arc<StateStore>,
    shared: Arc<PumpShared>,
    bar: ProgressBar,
) {
    while let Ok(index) = jobs.recv().await {
        match upload_one(index, &file_id, total_size, &api, &file, &store, &shared).await {
            Ok(len) => bar.inc(len),
            Err(err) => {
                shared.errors.lock().await.push((index, err.to_string()));
                // A fatal chunk stops new work; in-flight chunks settle
                // on their own.
                jobs.close();
            }
        }
    }
}

async fn upload_one(
    index: u32,
    file_id: &str,
    total_size: u64,
    api: &ApiClient,
    file: &Arc<File>,
    store: &Arc<StateStore>,
    shared: &Arc<PumpShared>,
) -> Result<u64> {
    let (start, len) = chunk_span(index, total_size);

    let data = {
        let file = file.clone();
        tokio::task::spawn_blocking(move || -> io::Result<Bytes> {
            let mut buf = vec![0u8; len as usize];
            read_exact_at(&file, &mut buf, start)?;
            Ok(Bytes::from(buf))
        })
        .await??
    };

    let mut attempt: u32 = 0;
    loop {
        match api.upload_chunk(file_id, index, data.clone()).await {
            Ok(()) => break,
            Err(_) if attempt < MAX_RETRIES => {
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
            Err(err) => return Err(err),
        }
    }

    let mut state = shared.state.lock().await;
    state.uploaded.insert(index);
    store.save(&mut state).await?;

    Ok(len)
}

/// Builds the transfer progress bar.
pub(crate) fn progress_bar(file_name: &str, total_size: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{msg:<20!} [{bar:30.green/dim}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})",
    )
    .unwrap()
    .progress_chars("=> ");

    let bar = ProgressBar::new(total_size);
    bar.set_style(style);
    bar.set_message(file_name.to_string());
    bar
}
