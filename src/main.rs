use clap::{Parser, Subcommand};
use gwtrend_service::config::AppConfig;
use gwtrend_service::ingest::ea::EaClient;
use gwtrend_service::logging::{self, Component, LogLevel};
use gwtrend_service::{pipeline, stations, verify};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gwtrend", version, about = "Groundwater depth trend classification")]
struct Cli {
    /// Configuration file (overrides $GWTREND_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, clean and aggregate every registry station; write annual series and the summary report.
    Download,
    /// Classify every qualified station from its stored annual series.
    Classify,
    /// Score trend consistency among neighboring stations.
    Consistency,
    /// Run download, classify and consistency in order.
    All,
    /// Check every registry locator against the data source.
    Verify,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let level: LogLevel = config.logging.level.parse()?;
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.timestamps);
    logging::info(
        Component::System,
        None,
        &format!("output directory: {}", config.paths.output_dir.display()),
    );

    let registry = stations::load_registry(&config.paths.registry)?;
    logging::info(
        Component::System,
        None,
        &format!("{} stations in registry {}", registry.len(), config.paths.registry.display()),
    );

    match cli.command {
        Command::Download => {
            let client = EaClient::new(&config.source)?;
            pipeline::run_download(&client, &registry, &config)?;
        }
        Command::Classify => {
            pipeline::run_classification(&config)?;
        }
        Command::Consistency => {
            pipeline::run_consistency(&registry, &config)?;
        }
        Command::All => {
            let client = EaClient::new(&config.source)?;
            pipeline::run_download(&client, &registry, &config)?;
            pipeline::run_classification(&config)?;
            pipeline::run_consistency(&registry, &config)?;
        }
        Command::Verify => {
            let client = EaClient::new(&config.source)?;
            let report = verify::run_verification(&client, &registry);
            verify::write_report(&config.paths.verification_report(), &report)?;
            verify::print_summary(&report);
        }
    }

    Ok(())
}
