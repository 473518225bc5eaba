use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use displaydoc::Display;

pub type ServerResult<T> = Result<T, ServerError>;

/// The kind of an error.
#[derive(Debug, Display)]
pub enum ErrorKind {
    /// {0}
    RequestError(anyhow::Error),

    /// Upload not found
    NoSuchSession,

    /// File not found
    NotFound,

    /// Insufficient disk space: {0}
    InsufficientStorage(String),

    /// Invalid range
    RangeNotSatisfiable(u64),

    /// I/O error: {0}
    StorageError(anyhow::Error),
}

/// An error that can be returned to the client.
#[derive(Debug)]
pub struct ServerError {
    kind: ErrorKind,
}

impl ServerError {
    pub fn request_error(error: impl Into<anyhow::Error>) -> Self {
        ErrorKind::RequestError(error.into()).into()
    }

    pub fn storage_error(error: impl Into<anyhow::Error>) -> Self {
        ErrorKind::StorageError(error.into()).into()
    }

    fn status_code(&self) -> StatusCode {
        match &self.kind {
            ErrorKind::RequestError(_) => StatusCode::BAD_REQUEST,
            ErrorKind::NoSuchSession | ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            ErrorKind::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("{}", self.kind);
        } else {
            tracing::debug!("{}", self.kind);
        }

        if let ErrorKind::RangeNotSatisfiable(size) = &self.kind {
            let mut response = (status, self.kind.to_string()).into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }

        (status, self.kind.to_string()).into_response()
    }
}
