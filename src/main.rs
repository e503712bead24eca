//! rds-export
//!
//! Exports one metadata entity from PostgreSQL as a JSON array into S3 or a
//! local directory, and prints the job manifest.
//!
//! # Usage
//!
//! ```bash
//! # Compose and print the statement only
//! rds-export query --entity granules --filter "granules=status = 'completed'" --limit 5
//!
//! # Run an export
//! rds-export export --entity providers --columns name,protocol --bucket my-bucket
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rds_export::cli::{CliInterface, Commands, ExportArgs};
use rds_export::config::{Config, StorageBackend};
use rds_export::connection::{self, ConnectionParams};
use rds_export::error::Result;
use rds_export::export::{ExportJob, JobSettings, PgCursorFactory};
use rds_export::query::QueryComposer;
use rds_export::storage::{FilesystemStore, ObjectStore, S3Store};

/// Exit code when the job ran but its manifest carries an error
const EXIT_JOB_FAILED: i32 = 2;

/// Application entry point
#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands or run the export job
///
/// # Returns
/// * `Result<i32>` - Process exit code or error
async fn run() -> Result<i32> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    if cli.handle_subcommand().await? {
        return Ok(0);
    }

    match &cli.args().command {
        Commands::Export(args) => run_export(&cli, args).await,
        _ => Ok(0),
    }
}

/// Run one export job and print its manifest
async fn run_export(cli: &CliInterface, args: &ExportArgs) -> Result<i32> {
    let config = cli.config();
    config.validate()?;
    let request = cli.build_request(&args.request)?;

    let params = match &args.params_file {
        Some(path) => ConnectionParams::from_file(path)?,
        None => config.database.to_params(),
    };
    let pool = connection::connect(&params, config.connection_timeout()).await?;
    let store = open_store(config).await;

    let settings = JobSettings {
        bucket: config.storage.bucket.clone(),
        key_prefix: config.storage.key_prefix.clone(),
        naming: config.key_naming(),
        sink: config.sink_settings(),
        show_progress: args.progress && !cli.args().quiet,
    };

    let token = CancellationToken::new();
    let watchers = spawn_cancellation_watchers(&token, args.timeout);

    let job = ExportJob::new(
        QueryComposer::new(),
        Arc::new(PgCursorFactory::new(pool.clone(), config.export.row_count)),
        store,
        settings,
    )
    .with_cancellation(token);
    let result = job.run(&request).await;

    for watcher in watchers {
        watcher.abort();
    }
    pool.close().await;

    let manifest = result?;
    println!("{}", cli.render_json(&serde_json::to_value(&manifest)?)?);

    if manifest.is_success() {
        info!("Wrote {} rows to {}/{}", manifest.row_count, manifest.bucket, manifest.key);
        Ok(0)
    } else {
        Ok(EXIT_JOB_FAILED)
    }
}

/// Open the configured storage backend
async fn open_store(config: &Config) -> Arc<dyn ObjectStore> {
    match config.storage.backend {
        StorageBackend::S3 => Arc::new(
            S3Store::from_env(
                config.storage.region.clone(),
                config.storage.endpoint_url.clone(),
            )
            .await,
        ),
        StorageBackend::Filesystem => {
            Arc::new(FilesystemStore::new(config.storage.root_dir.clone()))
        }
    }
}

/// Cancel `token` on Ctrl+C and, when given, after `timeout` seconds
fn spawn_cancellation_watchers(token: &CancellationToken, timeout: Option<u64>) -> Vec<JoinHandle<()>> {
    let mut watchers = Vec::new();

    let ctrl_c_token = token.clone();
    watchers.push(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling export");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C: {}", err);
            }
        }
    }));

    if let Some(seconds) = timeout {
        let timeout_token = token.clone();
        watchers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            warn!("Timeout of {}s reached, cancelling export", seconds);
            timeout_token.cancel();
        }));
    }

    watchers
}

/// Initialize logging system based on verbosity level or `RUST_LOG`
///
/// Logs go to stderr so stdout carries only the manifest.
///
/// # Arguments
/// * `cli` - CLI interface with verbosity settings
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();
    // RUST_LOG, when set, replaces the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.args().no_color)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
