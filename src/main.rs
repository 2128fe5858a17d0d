//! CLI entry point for the kiteworks client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use kwapi_core::{ApiConfig, Database, Session, SqliteTokenStore, TransferMonitor, MIN_CHUNK_SIZE};
use tokio::io::AsyncSeekExt;
use tracing::{debug, info};

mod cli;
mod console;

use cli::{Args, Command};
use console::ConsoleSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let default_filter = if args.snoop {
        format!("{default_level},kwapi::trace=debug")
    } else {
        default_level.to_string()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(command = ?args.command, server = %args.server, "CLI arguments parsed");

    let session = open_session(&args).await?;
    run(&args, &session).await
}

async fn open_session(args: &Args) -> Result<Session> {
    let redirect_uri = args
        .redirect_uri
        .clone()
        .unwrap_or_else(|| format!("https://{}/rest/callback.html", args.server));

    let mut config = ApiConfig::new(&args.server)?
        .with_application_id(&args.client_id)
        .with_redirect_uri(redirect_uri)
        .with_verify_ssl(!args.insecure)
        .with_retries(u32::from(args.max_retries))
        .with_max_chunk_size(args.chunk_size_mb * MIN_CHUNK_SIZE)
        .with_trace(args.snoop);
    if let Some(endpoint) = &args.endpoint {
        config = config.with_endpoint(endpoint)?;
    }
    if let Some(proxy) = &args.proxy {
        config = config.with_proxy(proxy);
    }
    if let Some(secret) = &args.client_secret {
        config.set_client_secret(secret)?;
    }

    let db_path = args
        .db
        .clone()
        .or_else(cli::default_db_path)
        .context("cannot determine a token database path; pass --db")?;
    let key_material = args
        .token_key
        .clone()
        .or_else(|| args.client_secret.clone())
        .context("token encryption needs --token-key or --client-secret")?;
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("opening token database {}", db_path.display()))?;
    config = config.with_token_store(Arc::new(SqliteTokenStore::new(db, &key_material)));

    Ok(Session::new(Arc::new(config), &args.user))
}

async fn run(args: &Args, session: &Session) -> Result<()> {
    let monitor = TransferMonitor::new(Arc::new(ConsoleSink::new(args.quiet)));

    match &args.command {
        Command::Login { password } => {
            session.authenticate(password).await?;
            info!(user = %session.username(), "logged in");
        }
        Command::Logout => {
            session.logout().await?;
            info!(user = %session.username(), "token removed");
        }
        Command::Upload { folder, path } => {
            let file_id = session.upload_file(*folder, path, Some(&monitor)).await?;
            println!("{file_id}");
        }
        Command::Version { file, path } => {
            let (handle, size, name) = open_local(path).await?;
            let upload_id = session.new_version(*file, &name, size).await?;
            let file_id = session.upload(&name, upload_id, handle, Some(&monitor)).await?;
            println!("{file_id}");
        }
        Command::Resume { upload_id, path } => {
            let (handle, _, name) = open_local(path).await?;
            let file_id = session.upload(&name, *upload_id, handle, Some(&monitor)).await?;
            println!("{file_id}");
        }
        Command::Download {
            file_id,
            output,
            resume,
        } => download(session, &monitor, *file_id, output, *resume).await?,
    }
    Ok(())
}

async fn open_local(path: &Path) -> Result<(tokio::fs::File, u64, String)> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let size = file.metadata().await?.len();
    let Some(name) = path.file_name() else {
        bail!("{} has no file name", path.display());
    };
    Ok((file, size, name.to_string_lossy().into_owned()))
}

async fn download(
    session: &Session,
    monitor: &TransferMonitor,
    file_id: u64,
    output: &Path,
    resume: bool,
) -> Result<()> {
    let mut reader = session.download(file_id, monitor).await?;
    let name = reader.record().name().to_string();
    let target: PathBuf = output.join(sanitize(&name));
    tokio::fs::create_dir_all(output).await?;

    let existing = match tokio::fs::metadata(&target).await {
        Ok(meta) if resume => meta.len(),
        _ => 0,
    };
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(existing > 0)
        .write(true)
        .truncate(existing == 0)
        .open(&target)
        .await
        .with_context(|| format!("creating {}", target.display()))?;

    if existing > 0 {
        if existing >= reader.record().total() {
            info!(path = %target.display(), "already downloaded");
            return Ok(());
        }
        reader.seek(std::io::SeekFrom::Start(existing)).await?;
        debug!(offset = existing, "resuming download");
    }

    tokio::io::copy(&mut reader, &mut file).await?;
    info!(path = %target.display(), "downloaded");
    Ok(())
}

/// Keeps a server-supplied name inside the output directory.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}
