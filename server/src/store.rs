//! On-disk chunk staging and final assembly.
//!
//! Each session stages its chunks under `<temp>/<session_id>/chunk_<i>`.
//! Finalize streams the chunks in ascending index order into the
//! destination file while feeding the same bytes through a SHA-256, so
//! the whole-file checksum is computed in one pass.

use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use ctrans::api::upload::ChunkStatus;
use ctrans::io::HashReader;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Staging store for uploaded chunks.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn session_dir(&self, file_id: &str) -> PathBuf {
        self.root.join(file_id)
    }

    fn chunk_path(&self, file_id: &str, index: u32) -> PathBuf {
        self.session_dir(file_id).join(format!("chunk_{index}"))
    }

    /// Creates the staging directory for a new session.
    pub async fn create_session_dir(&self, file_id: &str) -> io::Result<()> {
        fs::create_dir_all(self.session_dir(file_id)).await
    }

    /// Streams a chunk body to disk, hashing the bytes as they pass.
    ///
    /// On I/O failure the partial chunk file is removed (best effort)
    /// and the error is surfaced; the caller must not mark the chunk as
    /// uploaded in that case.
    pub async fn put_chunk<R>(
        &self,
        file_id: &str,
        index: u32,
        body: R,
    ) -> io::Result<(String, u64)>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.chunk_path(file_id, index);
        let (mut reader, compute) = HashReader::new(body, Sha256::new());

        let result: io::Result<u64> = async {
            let mut file = File::create(&path).await?;
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok(written)
        }
        .await;

        match result {
            Ok(written) => {
                let hash = compute
                    .get()
                    .map(|(hash, _)| hex::encode(hash))
                    .unwrap_or_default();
                Ok((hash, written))
            }
            Err(err) => {
                let _ = fs::remove_file(&path).await;
                Err(err)
            }
        }
    }

    /// Reports presence, size and content hash of one staged chunk.
    ///
    /// The hash is computed on demand by streaming the file; it is not
    /// cached anywhere.
    pub async fn chunk_status(&self, file_id: &str, index: u32) -> ChunkStatus {
        let path = self.chunk_path(file_id, index);

        let Ok(meta) = fs::metadata(&path).await else {
            return ChunkStatus::default();
        };

        let hash = match hash_file(&path).await {
            Ok(hash) => Some(hash),
            Err(err) => {
                tracing::warn!(%file_id, index, "failed to hash staged chunk: {err}");
                None
            }
        };

        ChunkStatus {
            exists: true,
            size: meta.len(),
            hash,
        }
    }

    /// Concatenates chunks `0..total_chunks` into `dest`, returning the
    /// hex SHA-256 of the assembled byte stream.
    ///
    /// `dest` is created (truncating any previous content), so a failed
    /// assembly can simply be retried.
    pub async fn assemble(
        &self,
        file_id: &str,
        total_chunks: u32,
        dest: &Path,
    ) -> io::Result<String> {
        let mut out = File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];

        for index in 0..total_chunks {
            let mut chunk = File::open(self.chunk_path(file_id, index)).await?;
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
            }
        }

        out.flush().await?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Removes a session's staging directory recursively.
    pub async fn remove_session(&self, file_id: &str) -> io::Result<()> {
        fs::remove_dir_all(self.session_dir(file_id)).await
    }
}

/// Joins a client-supplied relative path onto `root`, rejecting any
/// component that could escape it (`..`, absolute segments, drive
/// prefixes). Returns `None` for unsafe or empty paths.
pub fn resolve_under_root(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();

    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if out == root {
        return None;
    }

    Some(out)
}

async fn hash_file(path: &Path) -> io::Result<String> {
    let file = File::open(path).await?;
    let (mut reader, compute) = HashReader::new(file, Sha256::new());

    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;

    Ok(compute
        .get()
        .map(|(hash, _)| hex::encode(hash))
        .unwrap_or_default())
}
