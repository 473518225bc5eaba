//! HTTP client for the ctrans server API.

use std::error::Error as StdError;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use const_format::formatcp;
use displaydoc::Display;
use reqwest::{
    header::{HeaderMap, HeaderValue, RANGE, USER_AGENT},
    Client as HttpClient, Response, StatusCode, Url,
};

use ctrans::api::files::FileEntry;
use ctrans::api::upload::{
    ChunkStatusResponse, UploadCompleteResponse, UploadInitRequest, UploadInitResponse,
    UploadStatusResponse,
};
use ctrans::api::SERVICE_KEY_HEADER;

/// The User-Agent string sent with every request.
const CTRANS_USER_AGENT: &str = formatcp!("ctrans/{}", env!("CARGO_PKG_VERSION"));

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The ctrans API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Base endpoint of the server.
    endpoint: Url,

    /// An initialized HTTP client.
    client: HttpClient,
}

/// An API error.
#[derive(Debug, Display)]
pub enum ApiError {
    /// HTTP {0}: {1}
    Response(StatusCode, String),
}

impl StdError for ApiError {}

impl ApiError {
    async fn from_response(response: Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Self::Response(status, text)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Response(status, _) => *status,
        }
    }
}

/// Prefixes `http://` when the address carries no scheme, so plain
/// `host:port` arguments work.
pub fn normalize_server_addr(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

impl ApiClient {
    pub fn new(server_addr: &str, key: Option<&str>) -> Result<Self> {
        let endpoint = Url::parse(&normalize_server_addr(server_addr))?;
        let client = build_http_client(key)?;

        Ok(Self { endpoint, client })
    }

    /// The normalized server address this client talks to, without a
    /// trailing slash. Matches what is stored in local session records.
    pub fn server_addr(&self) -> String {
        self.endpoint.as_str().trim_end_matches('/').to_string()
    }

    /// Creates an upload session.
    pub async fn init_upload(
        &self,
        file_name: &str,
        total_size: u64,
    ) -> Result<UploadInitResponse> {
        let endpoint = self.endpoint.join("/upload/init")?;
        let payload = UploadInitRequest {
            file_name: file_name.to_string(),
            total_size,
        };

        let res = self.client.post(endpoint).json(&payload).send().await?;

        if res.status().is_success() {
            Ok(res.json().await?)
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }

    /// Uploads one chunk body.
    pub async fn upload_chunk(&self, file_id: &str, index: u32, data: Bytes) -> Result<()> {
        let endpoint = self
            .endpoint
            .join(&format!("/upload/chunk/{file_id}/{index}"))?;

        let res = self.client.post(endpoint).body(data).send().await?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }

    /// Returns the session record.
    pub async fn upload_status(&self, file_id: &str) -> Result<UploadStatusResponse> {
        let endpoint = self.endpoint.join(&format!("/upload/status/{file_id}"))?;

        let res = self.client.get(endpoint).send().await?;

        if res.status().is_success() {
            Ok(res.json().await?)
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }

    /// Returns the per-chunk report, or `None` if the server no longer
    /// knows the session.
    pub async fn chunk_status(&self, file_id: &str) -> Result<Option<ChunkStatusResponse>> {
        let endpoint = self
            .endpoint
            .join(&format!("/upload/status/{file_id}/chunks"))?;

        let res = self.client.get(endpoint).send().await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if res.status().is_success() {
            Ok(Some(res.json().await?))
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }

    /// Finalizes an upload, returning the whole-file checksum.
    pub async fn complete_upload(&self, file_id: &str) -> Result<UploadCompleteResponse> {
        let endpoint = self.endpoint.join(&format!("/upload/complete/{file_id}"))?;

        let res = self.client.post(endpoint).send().await?;

        if res.status().is_success() {
            Ok(res.json().await?)
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }

    /// Lists everything under the server's upload root.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>> {
        let endpoint = self.endpoint.join("/files")?;

        let res = self.client.get(endpoint).send().await?;

        if res.status().is_success() {
            Ok(res.json().await?)
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }

    /// Probes a remote file's size via `HEAD /download/{path}`.
    pub async fn download_size(&self, remote_path: &str) -> Result<u64> {
        let endpoint = self.endpoint.join(&format!("/download/{remote_path}"))?;

        let res = self.client.head(endpoint).send().await?;

        if !res.status().is_success() {
            return Err(ApiError::from_response(res).await.into());
        }

        res.content_length()
            .ok_or_else(|| anyhow::anyhow!("server did not report a file size"))
    }

    /// Starts a download, optionally from a byte offset.
    ///
    /// The caller checks the status (206 is required when resuming) and
    /// streams the body.
    pub async fn download(&self, remote_path: &str, offset: Option<u64>) -> Result<Response> {
        let endpoint = self.endpoint.join(&format!("/download/{remote_path}"))?;

        let mut req = self.client.get(endpoint);
        if let Some(offset) = offset {
            req = req.header(RANGE, format!("bytes={offset}-"));
        }

        let res = req.send().await?;

        if res.status().is_success() {
            Ok(res)
        } else {
            Err(ApiError::from_response(res).await.into())
        }
    }
}

fn build_http_client(key: Option<&str>) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CTRANS_USER_AGENT));

    if let Some(key) = key {
        headers.insert(SERVICE_KEY_HEADER, HeaderValue::from_str(key)?);
    }

    Ok(HttpClient::builder()
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_a_scheme() {
        assert_eq!(normalize_server_addr("host:8080"), "http://host:8080");
        assert_eq!(normalize_server_addr("http://host:8080"), "http://host:8080");
        assert_eq!(normalize_server_addr("https://host"), "https://host");
    }

    #[test]
    fn server_addr_round_trips() {
        let client = ApiClient::new("localhost:9000", None).unwrap();
        assert_eq!(client.server_addr(), "http://localhost:9000");
    }
}
