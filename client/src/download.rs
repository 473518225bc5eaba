//! Range-resuming downloads.

use std::path::Path;

use anyhow::{bail, Result};
use futures::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::api::ApiClient;
use crate::transfer::progress_bar;

/// Downloads a remote file, appending to any partial local copy.
///
/// The size comes from a HEAD probe. When a partial file is present the
/// request carries `Range: bytes=<have>-` and anything but a 206 reply
/// is fatal (re-downloading from zero would corrupt the append).
pub async fn download(api: &ApiClient, remote_path: &str, local_path: &Path) -> Result<()> {
    let total = api.download_size(remote_path).await?;
    let file_name = remote_path.rsplit('/').next().unwrap_or(remote_path);

    let have = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
    if total > 0 && have >= total {
        eprintln!("file already downloaded");
        return Ok(());
    }

    let bar = progress_bar(file_name, total);

    let (mut out, response) = if have > 0 {
        let response = api.download(remote_path, Some(have)).await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            bail!("server does not support resuming downloads");
        }
        bar.inc(have);

        let out = tokio::fs::OpenOptions::new()
            .append(true)
            .open(local_path)
            .await?;
        (out, response)
    } else {
        let out = tokio::fs::File::create(local_path).await?;
        let response = api.download(remote_path, None).await?;
        (out, response)
    };

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        bar.inc(chunk.len() as u64);
    }
    out.flush().await?;

    bar.finish_and_clear();
    eprintln!("✅ download completed: {}", local_path.display());

    Ok(())
}
