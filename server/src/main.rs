//! ctrans server binary.
//!
//! Serves the chunked-upload, download and listing endpoints over plain
//! HTTP. Session state lives in memory; staged chunks and finalized
//! files live under the temp and upload directories.

mod api;
mod auth;
mod disk;
mod error;
mod session;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::{middleware, Router};
use clap::Parser;
use tracing::info;

use crate::session::SessionRegistry;
use crate::store::ChunkStore;

#[derive(Parser, Debug)]
#[command(name = "ctrans-server", version, about = "Resumable file transfer server")]
struct Args {
    /// Bind address
    #[arg(long, env = "CTRANS_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port number
    #[arg(short, long, env = "CTRANS_PORT", default_value_t = 8080)]
    port: u16,

    /// Service key for authentication (unset disables the check)
    #[arg(short, long, env = "CTRANS_KEY")]
    key: Option<String>,

    /// Directory for finalized files
    #[arg(long, env = "CTRANS_UPLOAD_DIR", default_value = "./uploads")]
    upload_dir: PathBuf,

    /// Directory for staged chunks
    #[arg(long, env = "CTRANS_TEMP_DIR", default_value = "./temp")]
    temp_dir: PathBuf,
}

/// Runtime configuration shared by every handler.
#[derive(Debug)]
pub(crate) struct ServerConfig {
    pub upload_dir: PathBuf,
    pub service_key: Option<String>,
}

/// Shared server state injected into handlers via `Extension`.
#[derive(Debug, Clone)]
pub(crate) struct State {
    pub config: Arc<ServerConfig>,
    pub sessions: Arc<SessionRegistry>,
    pub store: Arc<ChunkStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();

    for dir in [&args.upload_dir, &args.temp_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let auth_enabled = args.key.is_some();
    let state = State {
        config: Arc::new(ServerConfig {
            upload_dir: args.upload_dir,
            service_key: args.key,
        }),
        sessions: Arc::new(SessionRegistry::new()),
        store: Arc::new(ChunkStore::new(args.temp_dir)),
    };

    let app = Router::new()
        .route("/upload/init", post(api::upload::init_upload))
        .route(
            "/upload/chunk/{file_id}/{index}",
            post(api::upload::upload_chunk).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/status/{file_id}", get(api::upload::upload_status))
        .route(
            "/upload/status/{file_id}/chunks",
            get(api::upload::chunk_status),
        )
        .route(
            "/upload/complete/{file_id}",
            post(api::upload::complete_upload),
        )
        .route("/download/{*path}", get(api::download::download))
        .route("/files", get(api::files::list_files))
        .layer(middleware::from_fn(auth::require_service_key))
        .layer(Extension(state));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("server started at http://{addr}");
    if auth_enabled {
        info!("service key authentication enabled");
    } else {
        info!("service key authentication disabled");
    }
    info!("endpoints:");
    info!("  POST /upload/init");
    info!("  POST /upload/chunk/{{file_id}}/{{index}}");
    info!("  GET  /upload/status/{{file_id}}");
    info!("  GET  /upload/status/{{file_id}}/chunks");
    info!("  POST /upload/complete/{{file_id}}");
    info!("  GET  /download/{{path}}");
    info!("  GET  /files");

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
