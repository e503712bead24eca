//! Command-line interface for rds-export
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and CLI overrides
//! - Building export requests from flags or a request file
//! - Subcommands that need no database (query, config, completion, version)

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{Config, LogLevel, StorageBackend};
use crate::error::{ConfigError, ExportError, Result};
use crate::export::postgres::RowCountMode;
use crate::query::{ComposedQuery, ExportRequest, QueryComposer};

pub mod completion;

/// Metadata export from PostgreSQL to object storage
#[derive(Parser, Debug)]
#[command(
    name = "rds-export",
    version,
    about = "Export metadata tables to JSON in object storage",
    long_about = "Composes a read-only query for one metadata entity, joins the related
entities its records reference, and streams the result as a JSON array into
S3 or a local directory."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for rds-export
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an export job and print its manifest
    Export(ExportArgs),

    /// Compose the statement for a request and print it without running it
    Query(RequestArgs),

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },

    /// Generate shell completion script
    Completion {
        /// Shell type (bash, zsh, fish)
        #[arg(value_name = "SHELL")]
        shell: String,
    },

    /// Show version information
    Version,
}

/// Describes the export request
#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// JSON request file ({entity, columns, filters, limit, batchSize})
    #[arg(long, value_name = "FILE", conflicts_with_all = ["entity", "columns", "filters", "limit"])]
    pub request: Option<PathBuf>,

    /// Entity to export
    #[arg(long, value_name = "ENTITY")]
    pub entity: Option<String>,

    /// Comma separated columns, or '*'
    #[arg(long, value_name = "COLUMNS")]
    pub columns: Option<String>,

    /// Filter as scope=predicate; repeatable
    #[arg(long = "filter", value_name = "SCOPE=PREDICATE")]
    pub filters: Vec<String>,

    /// Maximum rows; 0 for no limit
    #[arg(long, value_name = "ROWS")]
    pub limit: Option<u64>,

    /// Rows fetched per round trip
    #[arg(long, value_name = "ROWS")]
    pub batch_size: Option<usize>,
}

/// Flags of the export subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Secret-shaped JSON file with connection parameters
    #[arg(long, value_name = "FILE")]
    pub params_file: Option<PathBuf>,

    /// Destination bucket
    #[arg(long, value_name = "BUCKET")]
    pub bucket: Option<String>,

    /// Object key prefix
    #[arg(long, value_name = "PREFIX")]
    pub key_prefix: Option<String>,

    /// Storage backend (s3, filesystem)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Root directory of the filesystem backend
    #[arg(long, value_name = "DIR")]
    pub root_dir: Option<PathBuf>,

    /// S3 region
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,

    /// Custom S3 endpoint
    #[arg(long, value_name = "URL")]
    pub endpoint_url: Option<String>,

    /// How the projected row count is obtained (exact, limit)
    #[arg(long, value_name = "MODE")]
    pub row_count: Option<String>,

    /// Write external field names instead of column names
    #[arg(long)]
    pub external_names: bool,

    /// Cancel the job after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, &args)?;
        Ok(Self { args, config })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Apply CLI arguments to configuration
    ///
    /// Overrides configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) -> Result<()> {
        Self::apply_logging_args(config, args);
        if let Commands::Export(export) = &args.command {
            Self::apply_export_args(config, export)?;
        }
        Ok(())
    }

    /// Apply logging-related CLI arguments to configuration
    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    /// Apply export-related CLI arguments to configuration
    fn apply_export_args(config: &mut Config, args: &ExportArgs) -> Result<()> {
        if let Some(bucket) = &args.bucket {
            config.storage.bucket = bucket.clone();
        }
        if let Some(prefix) = &args.key_prefix {
            config.storage.key_prefix = prefix.clone();
        }
        if let Some(backend) = &args.backend {
            config.storage.backend = Self::parse_backend(backend)?;
        }
        if let Some(root) = &args.root_dir {
            config.storage.root_dir = root.clone();
        }
        if let Some(region) = &args.region {
            config.storage.region = Some(region.clone());
        }
        if let Some(endpoint) = &args.endpoint_url {
            config.storage.endpoint_url = Some(endpoint.clone());
        }
        if let Some(mode) = &args.row_count {
            config.export.row_count = mode.parse::<RowCountMode>().map_err(|_| {
                ExportError::Config(ConfigError::InvalidValue {
                    field: "row_count".to_string(),
                    value: mode.clone(),
                })
            })?;
        }
        if args.external_names {
            config.export.external_field_names = true;
        }
        if let Some(batch_size) = args.request.batch_size {
            config.export.batch_size = batch_size;
        }
        Ok(())
    }

    /// Parse storage backend string
    fn parse_backend(backend: &str) -> Result<StorageBackend> {
        match backend.to_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "filesystem" | "fs" | "local" => Ok(StorageBackend::Filesystem),
            other => Err(ExportError::Config(ConfigError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
            })),
        }
    }

    /// Build the export request from a request file or flags
    ///
    /// # Arguments
    /// * `args` - Request flags
    ///
    /// # Returns
    /// * `Result<ExportRequest>` - Request, batch size defaulted from config
    pub fn build_request(&self, args: &RequestArgs) -> Result<ExportRequest> {
        if let Some(path) = &args.request {
            return Self::read_request_file(path);
        }

        let entity = args
            .entity
            .as_deref()
            .ok_or_else(|| ExportError::Config(ConfigError::MissingField("entity".to_string())))?;

        let mut request = ExportRequest::new(entity)
            .batch_size(args.batch_size.unwrap_or(self.config.export.batch_size));
        if let Some(columns) = &args.columns {
            request = request.columns(columns);
        }
        if let Some(limit) = args.limit {
            request = request.limit(limit);
        }
        for filter in &args.filters {
            let (scope, predicate) = parse_filter(filter)?;
            request = request.filter(scope, predicate);
        }
        Ok(request)
    }

    fn read_request_file(path: &Path) -> Result<ExportRequest> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ExportError::Config(ConfigError::FileNotFound(path.display().to_string()))
            }
            _ => ExportError::Io(e),
        })?;
        serde_json::from_str(&text)
            .map_err(|e| ExportError::Config(ConfigError::InvalidFormat(e.to_string())))
    }

    /// Handle subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if subcommand was handled, false to run an export
    pub async fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Commands::Version => {
                self.show_version();
                Ok(true)
            }
            Commands::Completion { shell } => {
                completion::generate_completion(shell)?;
                Ok(true)
            }
            Commands::Config { show, validate } => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            Commands::Query(args) => {
                let request = self.build_request(args)?;
                let composed = QueryComposer::new().compose(&request)?;
                println!("{}", self.render_json(&query_json(&composed))?);
                Ok(true)
            }
            Commands::Export(_) => Ok(false),
        }
    }

    /// Render JSON for the terminal, colored unless disabled
    pub fn render_json(&self, value: &serde_json::Value) -> Result<String> {
        let text = if self.args.no_color {
            serde_json::to_string_pretty(value)?
        } else {
            colored_json::to_colored_json_auto(value)?
        };
        Ok(text)
    }

    /// Show version information
    fn show_version(&self) {
        println!("rds-export version {}", env!("CARGO_PKG_VERSION"));
    }

    /// Handle config subcommand
    ///
    /// # Arguments
    /// * `show` - Whether to show configuration
    /// * `validate` - Whether to validate configuration
    ///
    /// # Returns
    /// * `Result<()>` - Success or error
    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file();
        }

        if show {
            self.show_config()?;
        }

        Ok(())
    }

    /// Validate configuration file
    fn validate_config_file(&self) {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("Configuration file does not exist, defaults apply");
        }

        match self.config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => println!("Configuration validation failed: {}", e),
        }
    }

    /// Show effective configuration
    fn show_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("Configuration file: {}", path.display());
        println!();
        println!("=== Effective Configuration ===");
        println!();

        let mut shown = self.config.clone();
        if !shown.database.password.is_empty() {
            shown.database.password = "***".to_string();
        }
        println!("{}", shown.to_toml()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_path)
    }
}

/// Split a `scope=predicate` filter flag at its first `=`
fn parse_filter(flag: &str) -> Result<(String, String)> {
    flag.split_once('=')
        .map(|(scope, predicate)| (scope.trim().to_string(), predicate.trim().to_string()))
        .filter(|(scope, _)| !scope.is_empty())
        .ok_or_else(|| {
            ExportError::Config(ConfigError::InvalidValue {
                field: "filter".to_string(),
                value: flag.to_string(),
            })
        })
}

/// JSON form of a composed statement for the query subcommand
pub fn query_json(query: &ComposedQuery) -> serde_json::Value {
    serde_json::json!({
        "entity": query.entity.name(),
        "sql": query.sql,
        "args": query.args,
        "limit": query.limit,
        "batchSize": query.batch_size,
    })
}
