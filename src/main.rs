//! Command-line client for an object-storage bucket mounted as a
//! hierarchical filesystem.

mod commands;
mod error;

use crate::commands::Command;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use ossdav_config::Config;
use ossdav_storage::BackendHandle;
use ossdav_storage::backend::{ReadOnlyBackend, S3Backend};
use ossdav_vfs::{BucketFileSystem, Credentials, MountIdentity, MountState, ResourceCache};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ossdav", version, about = "Browse an object-storage bucket as a filesystem")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

/// Logs go to stderr so `cat` output stays clean. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let backend = connect(&config)?;
    let state_path = config.state_path();
    let fs = mount(&config, backend, state_path.as_deref()).await;

    let mut stdout = tokio::io::stdout();
    commands::run(&fs, cli.command, &mut stdout).await?;

    if let Some(path) = state_path {
        MountState::capture(&fs).await.save(&path).await.or_raise(|| ErrorKind::State)?;
        tracing::debug!(path = %path.display(), "Mount state saved");
    }
    Ok(())
}

fn connect(config: &Config) -> Result<BackendHandle> {
    let mount = &config.mount;
    let s3 = S3Backend::new(
        "oss",
        &mount.bucket,
        mount.prefix().map(str::to_string),
        &mount.region,
        mount.endpoint_url(),
        &mount.key_id,
        &mount.key_secret,
    )
    .or_raise(|| ErrorKind::Mount(mount.bucket.clone()))?;
    let backend: BackendHandle = Arc::new(s3);
    Ok(match config.read_only {
        true => Arc::new(ReadOnlyBackend::new(backend)),
        false => backend,
    })
}

async fn mount(config: &Config, backend: BackendHandle, state: Option<&Path>) -> BucketFileSystem {
    let identity = MountIdentity {
        region: config.mount.region.clone(),
        bucket: config.mount.bucket.clone(),
        credentials: Credentials { key_id: config.mount.key_id.clone(), key_secret: config.mount.key_secret.clone() },
    };
    let cache = match state {
        Some(path) => warm_cache(path, &identity, backend.clone()).await,
        None => None,
    };
    let fs = BucketFileSystem::new(identity, backend).with_strict_delete(config.strict_delete);
    match cache {
        Some(cache) => fs.with_cache(cache),
        None => fs,
    }
}

/// Cache from the previous run, if it was for the same bucket. A state file
/// that can't be used means a cold start, never a failure.
async fn warm_cache(path: &Path, identity: &MountIdentity, backend: BackendHandle) -> Option<ResourceCache> {
    let state = match MountState::load(path).await {
        Ok(state) => state?,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = ?err, "Ignoring unreadable mount state");
            return None;
        },
    };
    if state.region != identity.region || state.bucket != identity.bucket {
        tracing::info!(bucket = %state.bucket, "Mount state belongs to another bucket; starting cold");
        return None;
    }
    match state.restore(backend).await {
        Ok(fs) => Some(fs.cache().clone()),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = ?err, "Ignoring unusable mount state");
            None
        },
    }
}
