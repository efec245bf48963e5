//! Command-line interface for assay-export
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and argument overrides
//! - The `destinations` and `config` subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tabled::{
    builder::Builder,
    settings::{Alignment, Modify, Style, object::{Columns, Rows}, width::Width},
};

use crate::config::{Config, LogLevel};
use crate::error::{ExportError, Result};
use crate::export::destination::DestinationRegistry;

/// Wrap width for the column list in the destinations table
const COLUMN_LIST_WIDTH: usize = 60;

/// Export QC assay records into one CSV file per assay
#[derive(Parser, Debug)]
#[command(
    name = "assay-export",
    version,
    about = "Stream QC assay records into per-assay CSV files",
    long_about = "Pages through the QC report collection in id order and writes every
record into the CSV file of each assay it has values for. Files are written
under a temporary name and renamed into place when the run ends."
)]
pub struct CliArgs {
    /// MongoDB connection URI
    ///
    /// Format: mongodb://[username:password@]host[:port][/database][?options]
    #[arg(value_name = "URI")]
    pub uri: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Directory receiving the CSV files
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Database holding the QC reports
    #[arg(long, value_name = "NAME")]
    pub database: Option<String>,

    /// Collection holding the QC reports
    #[arg(long, value_name = "NAME")]
    pub collection: Option<String>,

    /// Records fetched per page
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub page_size: Option<u32>,

    /// Do not write a UTF-8 byte-order mark
    #[arg(long = "no-bom")]
    pub no_bom: bool,

    /// Leave temporary files in place when the run fails
    #[arg(long)]
    pub keep_temp_on_failure: bool,

    /// Disable the progress spinner
    #[arg(long)]
    pub no_progress: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for assay-export
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the destinations and their columns
    Destinations,

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface from the process arguments
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and merge with arguments
    ///
    /// # Arguments
    /// * `args` - Command-line arguments
    ///
    /// # Returns
    /// * `Result<Config>` - Validated configuration or error
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load_from_file(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, args);
        config.validate()?;
        Ok(config)
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
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        Self::apply_export_args(config, args);
        Self::apply_logging_args(config, args);
        Self::apply_source_args(config, args);
    }

    fn apply_export_args(config: &mut Config, args: &CliArgs) {
        if let Some(dir) = &args.output_dir {
            config.export.output_dir = dir.clone();
        }
        if let Some(page_size) = args.page_size {
            config.export.page_size = page_size;
        }
        if args.no_bom {
            config.export.byte_order_mark = false;
        }
        if args.keep_temp_on_failure {
            config.export.commit_on_failure = false;
        }
        if args.no_progress || args.quiet {
            config.export.show_progress = false;
        }
    }

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

    fn apply_source_args(config: &mut Config, args: &CliArgs) {
        if let Some(uri) = &args.uri {
            config.source.uri = uri.clone();
        }
        if let Some(database) = &args.database {
            config.source.database = database.clone();
        }
        if let Some(collection) = &args.collection {
            config.source.collection = collection.clone();
        }
        if let Some(timeout) = args.timeout {
            config.source.timeout = timeout;
        }
    }

    /// Handle subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if subcommand was handled, false to run the export
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Destinations) => {
                let registry = self.config.registry()?;
                println!("{}", destinations_table(&registry));
                Ok(true)
            }
            Some(Commands::Config { show, validate }) => {
                if *validate {
                    // Loading already validated; reaching here means it passed
                    println!(
                        "Configuration is valid: {}",
                        self.get_config_path().display()
                    );
                }
                if *show || !*validate {
                    self.show_config()?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Show effective configuration
    fn show_config(&self) -> Result<()> {
        println!("Configuration file: {}", self.get_config_path().display());
        println!();
        println!("{}", self.config.to_toml()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_path)
    }

    /// Create the output directory if it does not exist
    pub async fn prepare_output_dir(&self) -> Result<PathBuf> {
        let dir = self.config.export.output_dir.clone();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ExportError::Generic(format!(
                "Cannot create output directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(dir)
    }
}

/// Render the destinations as a table
pub fn destinations_table(registry: &DestinationRegistry) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Key", "File", "Columns"]);
    for destination in registry.all() {
        builder.push_record([
            destination.key.to_string(),
            destination.filename.clone(),
            destination.columns.join(", "),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::modern());
    table.with(Modify::new(Columns::new(2..=2)).with(Width::wrap(COLUMN_LIST_WIDTH)));
    table.with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::try_parse_from(vec!["assay-export"]).unwrap();
        assert!(args.uri.is_none());
        assert!(args.output_dir.is_none());
        assert!(args.command.is_none());
    }

    #[test]
    fn test_cli_args_with_flags() {
        let args = CliArgs::try_parse_from(vec![
            "assay-export",
            "mongodb://db:27017",
            "-o",
            "out",
            "--page-size",
            "100",
            "--no-bom",
            "--keep-temp-on-failure",
            "-q",
        ])
        .unwrap();

        assert_eq!(args.uri.as_deref(), Some("mongodb://db:27017"));
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
        assert_eq!(args.page_size, Some(100));
        assert!(args.no_bom);
        assert!(args.keep_temp_on_failure);
        assert!(args.quiet);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(CliArgs::try_parse_from(vec!["assay-export", "--page-size", "0"]).is_err());
    }

    #[test]
    fn test_subcommands() {
        let args = CliArgs::try_parse_from(vec!["assay-export", "destinations"]).unwrap();
        assert!(matches!(args.command, Some(Commands::Destinations)));

        let args = CliArgs::try_parse_from(vec!["assay-export", "config", "--show"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::Config {
                show: true,
                validate: false
            })
        ));
    }

    #[test]
    fn test_args_override_config() {
        let args = CliArgs::try_parse_from(vec![
            "assay-export",
            "mongodb://other:27017",
            "--database",
            "lab",
            "--collection",
            "reports",
            "--no-bom",
            "--keep-temp-on-failure",
            "--no-progress",
            "-v",
        ])
        .unwrap();
        let mut config = Config::default();
        CliInterface::apply_args_to_config(&mut config, &args);

        assert_eq!(config.source.uri, "mongodb://other:27017");
        assert_eq!(config.source.database, "lab");
        assert_eq!(config.source.collection, "reports");
        assert!(!config.export.byte_order_mark);
        assert!(!config.export.commit_on_failure);
        assert!(!config.export.show_progress);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_quiet_lowers_log_level() {
        let args = CliArgs::try_parse_from(vec!["assay-export", "-q"]).unwrap();
        let mut config = Config::default();
        CliInterface::apply_args_to_config(&mut config, &args);
        assert_eq!(config.logging.level, LogLevel::Error);
        assert!(!config.export.show_progress);
    }

    #[test]
    fn test_from_args_with_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[export]\npage_size = 42\n").unwrap();

        let args = CliArgs::try_parse_from(vec![
            "assay-export".to_string(),
            "-c".to_string(),
            path.display().to_string(),
        ])
        .unwrap();
        let cli = CliInterface::from_args(args).unwrap();
        assert_eq!(cli.config().export.page_size, 42);
    }

    #[tokio::test]
    async fn test_prepare_output_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        let args = CliArgs::try_parse_from(vec![
            "assay-export".to_string(),
            "-c".to_string(),
            path.display().to_string(),
            "-o".to_string(),
            target.display().to_string(),
        ])
        .unwrap();
        let cli = CliInterface::from_args(args).unwrap();

        let created = cli.prepare_output_dir().await.unwrap();
        assert!(created.is_dir());
    }

    #[test]
    fn test_destinations_table_lists_every_assay() {
        let registry = DestinationRegistry::qc_assays();
        let table = destinations_table(&registry);
        for destination in registry.all() {
            assert!(table.contains(&destination.filename));
        }
    }
}
