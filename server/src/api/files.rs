//! Recursive listing of the upload root.

use std::io;
use std::path::Path;

use axum::extract::{Extension, Json};
use chrono::{DateTime, Utc};
use tracing::instrument;
use walkdir::WalkDir;

use ctrans::api::files::FileEntry;

use crate::error::{ServerError, ServerResult};
use crate::State;

/// Serves `GET /files`: every entry under the upload root, files and
/// directories alike, with forward-slash-normalized relative paths.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn list_files(
    Extension(state): Extension<State>,
) -> ServerResult<Json<Vec<FileEntry>>> {
    let root = state.config.upload_dir.clone();

    let entries = tokio::task::spawn_blocking(move || walk_upload_root(&root))
        .await
        .map_err(ServerError::storage_error)?
        .map_err(ServerError::storage_error)?;

    Ok(Json(entries))
}

fn walk_upload_root(root: &Path) -> io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let meta = entry.metadata().map_err(io::Error::from)?;

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let modified: DateTime<Utc> = meta.modified()?.into();

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
            modified,
            is_dir: meta.is_dir(),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_nested_entries_with_relative_paths() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("top.bin"), b"12345").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub").join("inner.bin"), b"abc").unwrap();

        let mut entries = walk_upload_root(temp.path()).unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["sub", "sub/inner.bin", "top.bin"]);

        let inner = entries.iter().find(|e| e.path == "sub/inner.bin").unwrap();
        assert_eq!(inner.name, "inner.bin");
        assert_eq!(inner.size, 3);
        assert!(!inner.is_dir);

        let sub = entries.iter().find(|e| e.path == "sub").unwrap();
        assert!(sub.is_dir);
    }

    #[test]
    fn empty_root_lists_nothing() {
        let temp = TempDir::new().unwrap();
        assert!(walk_upload_root(temp.path()).unwrap().is_empty());
    }
}
