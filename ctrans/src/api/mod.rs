//! Wire-level API definitions shared by the client and server.

pub mod files;
pub mod upload;

/// Header carrying the shared service key.
///
/// When the server is started with a key, every request must present it
/// in this header; otherwise the check is disabled entirely.
pub const SERVICE_KEY_HEADER: &str = "X-Service-Key";
