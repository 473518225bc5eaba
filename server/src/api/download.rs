//! Range-capable file download.

use std::io::SeekFrom;

use anyhow::anyhow;
use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::instrument;

use crate::error::{ErrorKind, ServerError, ServerResult};
use crate::store::resolve_under_root;
use crate::State;

/// Serves `GET`/`HEAD /download/{path}`.
///
/// The requested path is joined under the upload root with traversal
/// components rejected. A single `Range: bytes=S-E` (either bound
/// optional) yields 206 with `Content-Range`; malformed or
/// unsatisfiable ranges yield 416.
#[instrument(skip_all)]
#[axum_macros::debug_handler]
pub(crate) async fn download(
    Extension(state): Extension<State>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let target = resolve_under_root(&state.config.upload_dir, &path)
        .ok_or_else(|| ServerError::request_error(anyhow!("Invalid file path")))?;

    let meta = tokio::fs::metadata(&target)
        .await
        .map_err(|_| ErrorKind::NotFound)?;

    if meta.is_dir() {
        return Err(ServerError::request_error(anyhow!(
            "Cannot download directory"
        )));
    }

    let file_size = meta.len();
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename={file_name}")) {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if method == Method::HEAD {
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
        return Ok((StatusCode::OK, response_headers, Body::empty()).into_response());
    }

    let range = parse_range(headers.get(header::RANGE), file_size)?;

    let mut file = File::open(&target)
        .await
        .map_err(ServerError::storage_error)?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(ServerError::storage_error)?;

        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{file_size}"))
                .map_err(ServerError::storage_error)?,
        );
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

        let stream = ReaderStream::new(file.take(length));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            Body::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, response_headers, Body::from_stream(stream)).into_response())
}

/// Parses a single `bytes=S-E` range against `file_size`.
///
/// `Ok(None)` means no Range header was sent. Suffix form (`bytes=-N`)
/// and open end (`bytes=S-`) are both accepted. Anything else that
/// fails to parse or lands outside the file maps to 416.
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ServerError> {
    let Some(value) = value else {
        return Ok(None);
    };

    let unsatisfiable = || ServerError::from(ErrorKind::RangeNotSatisfiable(file_size));

    let value = value.to_str().map_err(|_| unsatisfiable())?;
    let Some(raw) = value.strip_prefix("bytes=") else {
        return Err(unsatisfiable());
    };
    if raw.contains(',') {
        // multiple ranges are not supported
        return Err(unsatisfiable());
    }

    let Some((start_raw, end_raw)) = raw.split_once('-') else {
        return Err(unsatisfiable());
    };

    let (start, end) = if start_raw.is_empty() {
        // suffix form: the last N bytes
        let suffix: u64 = end_raw.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        (
            file_size.saturating_sub(suffix),
            file_size.saturating_sub(1),
        )
    } else {
        let start: u64 = start_raw.parse().map_err(|_| unsatisfiable())?;
        let end: u64 = if end_raw.is_empty() {
            file_size.saturating_sub(1)
        } else {
            end_raw.parse().map_err(|_| unsatisfiable())?
        };
        (start, end)
    };

    if file_size == 0 || start > end || end >= file_size {
        return Err(unsatisfiable());
    }

    Ok(Some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(raw: &str, size: u64) -> Result<Option<(u64, u64)>, ServerError> {
        let value = HeaderValue::from_str(raw).unwrap();
        parse_range(Some(&value), size)
    }

    #[test]
    fn no_header_means_full_body() {
        assert_eq!(parse_range(None, 100).unwrap(), None);
    }

    #[test]
    fn bounded_ranges() {
        assert_eq!(range("bytes=0-99", 100).unwrap(), Some((0, 99)));
        assert_eq!(range("bytes=100-199", 1_048_576).unwrap(), Some((100, 199)));
        assert_eq!(range("bytes=0-0", 1).unwrap(), Some((0, 0)));
    }

    #[test]
    fn open_ended_range() {
        assert_eq!(range("bytes=50-", 100).unwrap(), Some((50, 99)));
    }

    #[test]
    fn suffix_range() {
        assert_eq!(range("bytes=-10", 100).unwrap(), Some((90, 99)));
        // longer than the file clamps to the whole file
        assert_eq!(range("bytes=-500", 100).unwrap(), Some((0, 99)));
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert!(range("bytes=100-100", 100).is_err());
        assert!(range("bytes=0-100", 100).is_err());
        assert!(range("bytes=50-10", 100).is_err());
        assert!(range("bytes=0-0", 0).is_err());
    }

    #[test]
    fn malformed_ranges() {
        assert!(range("chars=0-10", 100).is_err());
        assert!(range("bytes=abc-10", 100).is_err());
        assert!(range("bytes=0-10,20-30", 100).is_err());
        assert!(range("bytes=", 100).is_err());
        assert!(range("bytes=-0", 100).is_err());
    }
}
