//! assay-export
//!
//! Exports QC assay records from MongoDB into one CSV file per assay.
//!
//! # Usage
//!
//! ```bash
//! assay-export mongodb://localhost:27017 -o exports
//! assay-export destinations
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use assay_export::cli::CliInterface;
use assay_export::connection::ConnectionManager;
use assay_export::error::Result;
use assay_export::export::{ExportOrchestrator, ProgressTracker};

/// Application entry point
#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Main application logic
///
/// # Returns
/// * `Result<bool>` - Whether the run (or subcommand) succeeded
async fn run() -> Result<bool> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(true);
    }

    run_export(&cli).await
}

/// Connect, export and report
async fn run_export(cli: &CliInterface) -> Result<bool> {
    let config = cli.config();
    let registry = config.registry()?;
    let output_dir = cli.prepare_output_dir().await?;

    let mut manager = ConnectionManager::new(config.source.clone());
    manager.connect().await?;
    let source = manager.record_source(&registry)?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, finishing open files");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C: {}", err);
            }
        }
    });

    info!(
        "Exporting {} destinations into {}",
        registry.len(),
        output_dir.display()
    );
    let mut coordinator = ExportOrchestrator::new(
        source,
        registry,
        config.export_options(),
        Box::new(ProgressTracker::new(config.export.show_progress)),
    )
    .with_cancellation(cancel);
    let report = coordinator.execute().await;
    ctrl_c_handle.abort();

    for path in report.committed_paths() {
        info!("Wrote {}", path.display());
    }
    if !report.reversible {
        warn!("Export is not reversible: files already renamed into place stay in place");
    }

    manager.disconnect().await;
    Ok(report.is_success())
}

/// Initialize logging system
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies.
fn initialize_logging(cli: &CliInterface) {
    let level = LevelFilter::from_level(cli.config().logging.level.to_tracing_level());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
