//! ctrans client binary.
//!
//! Three positional shapes map onto the transfer engine:
//!
//! ```text
//! ctrans <local-file> <server:port>          upload (resumes automatically)
//! ctrans <server:port>/<path> [local-path]   download (resumes partial files)
//! ctrans <server:port>                       list remote files
//! ctrans --resume <session-id> <server:port> resume an upload by id
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use indicatif::HumanBytes;

use ctrans_client::api::ApiClient;
use ctrans_client::state::{StateStore, STATE_DIR};
use ctrans_client::{download, transfer};

const USAGE: &str = "\
Usage:
  Upload:   ctrans <local-file> <server:port>
  Download: ctrans <server:port>/<path> [local-path]
  List:     ctrans <server:port>
  Resume:   ctrans --resume <session-id> <server:port>";

#[derive(Parser, Debug)]
#[command(name = "ctrans", version, about = "Resumable file transfer client", after_help = USAGE)]
struct Cli {
    /// Service key for authentication
    #[arg(short, long, env = "CTRANS_KEY")]
    key: Option<String>,

    /// Resume an upload by session id
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// Positional arguments; see the usage shapes below
    #[arg(value_name = "ARG")]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let key = cli.key.as_deref();

    if let Some(file_id) = &cli.resume {
        let [server] = cli.args.as_slice() else {
            eprintln!("{USAGE}");
            std::process::exit(1);
        };
        let api = ApiClient::new(server, key)?;
        let store = Arc::new(StateStore::open(STATE_DIR)?);
        return transfer::resume(&api, &store, file_id).await;
    }

    match cli.args.as_slice() {
        [target] if target.contains(':') && !target.contains('/') => {
            let api = ApiClient::new(target, key)?;
            list(&api).await
        }
        [remote] if target_is_remote_file(remote) => {
            let (server, path) = split_remote(remote)?;
            let local = path.rsplit('/').next().unwrap_or(&path).to_string();
            let api = ApiClient::new(&server, key)?;
            download::download(&api, &path, Path::new(&local)).await
        }
        [remote, local] if target_is_remote_file(remote) => {
            let (server, path) = split_remote(remote)?;
            let api = ApiClient::new(&server, key)?;
            download::download(&api, &path, Path::new(local)).await
        }
        [file, server] if server.contains(':') && !server.contains('/') => {
            let api = ApiClient::new(server, key)?;
            let store = Arc::new(StateStore::open(STATE_DIR)?);
            transfer::upload(&api, &store, Path::new(file)).await
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn target_is_remote_file(arg: &str) -> bool {
    let rest = arg.split_once("://").map_or(arg, |(_, rest)| rest);
    rest.contains(':') && rest.contains('/')
}

/// Splits `server:port/path/to/file` into the server address and the
/// remote path, preserving an explicit scheme.
fn split_remote(remote: &str) -> Result<(String, String)> {
    let (scheme, rest) = match remote.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, remote),
    };

    let (host, path) = rest
        .split_once('/')
        .ok_or_else(|| anyhow!("remote path must look like server:port/path"))?;
    if path.is_empty() {
        bail!("remote path must name a file");
    }

    let server = match scheme {
        Some(scheme) => format!("{scheme}://{host}"),
        None => host.to_string(),
    };

    Ok((server, path.to_string()))
}

async fn list(api: &ApiClient) -> Result<()> {
    let files = api.list_files().await?;

    if files.is_empty() {
        println!("no files available");
        return Ok(());
    }

    println!("available files:");
    for entry in &files {
        let size = if entry.is_dir {
            "dir".to_string()
        } else {
            HumanBytes(entry.size).to_string()
        };
        println!(
            "{:>12}  {}  {}",
            size,
            entry.modified.to_rfc3339(),
            entry.path
        );
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_paths_split() {
        assert_eq!(
            split_remote("host:8080/a.bin").unwrap(),
            ("host:8080".to_string(), "a.bin".to_string())
        );
        assert_eq!(
            split_remote("host:8080/nested/dir/a.bin").unwrap(),
            ("host:8080".to_string(), "nested/dir/a.bin".to_string())
        );
        assert_eq!(
            split_remote("http://host:8080/a.bin").unwrap(),
            ("http://host:8080".to_string(), "a.bin".to_string())
        );
        assert!(split_remote("host:8080").is_err());
        assert!(split_remote("host:8080/").is_err());
    }

    #[test]
    fn remote_file_shapes_are_recognized() {
        assert!(target_is_remote_file("host:8080/a.bin"));
        assert!(target_is_remote_file("http://host:8080/a.bin"));
        assert!(!target_is_remote_file("host:8080"));
        assert!(!target_is_remote_file("local/file.bin"));
    }
}
