use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use quotecache::core::log::init_logging;
use quotecache::core::{DateRange, Market, Resolution};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl TryFrom<Commands> for quotecache::AppCommand {
    type Error = anyhow::Error;

    fn try_from(cmd: Commands) -> Result<quotecache::AppCommand> {
        Ok(match cmd {
            Commands::Fetch {
                market,
                symbol,
                start,
                end,
                resolution,
                force,
            } => quotecache::AppCommand::Fetch {
                market,
                symbol,
                range: DateRange::new(start, end)?,
                resolution,
                force_refresh: force,
            },
            Commands::Instruments {
                market,
                search,
                force,
            } => quotecache::AppCommand::Instruments {
                market,
                search,
                force_refresh: force,
            },
            Commands::Invalidate { key } => quotecache::AppCommand::Invalidate { key },
            Commands::Stats => quotecache::AppCommand::Stats,
            Commands::Markets => quotecache::AppCommand::Markets,
            Commands::Setup => anyhow::bail!("Setup command should be handled separately"),
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Retrieve historical bars, from cache when possible
    Fetch {
        /// Market code (CN, HK, US)
        #[arg(short, long)]
        market: Market,
        /// Instrument symbol, e.g. 000001 or AAPL
        #[arg(short, long)]
        symbol: String,
        /// First date, YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,
        /// Last date, YYYY-MM-DD
        #[arg(long)]
        end: NaiveDate,
        /// Bar resolution (1d, 1wk, 1mo)
        #[arg(short, long, default_value = "1d")]
        resolution: Resolution,
        /// Skip the cache read and fetch from providers
        #[arg(short, long)]
        force: bool,
    },
    /// List a market's instruments, optionally filtered by code or name
    Instruments {
        /// Market code (CN, HK, US)
        #[arg(short, long)]
        market: Market,
        /// Case-insensitive keyword matched against symbol and name
        #[arg(short, long)]
        search: Option<String>,
        /// Skip the cache read and fetch from providers
        #[arg(short, long)]
        force: bool,
    },
    /// Remove one cache entry from every tier by its key
    Invalidate {
        /// Canonical cache key as printed in logs
        key: String,
    },
    /// Display cache tier status
    Stats,
    /// List markets and their provider priority
    Markets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => quotecache::cli::setup::setup(),
        Some(cmd) => match quotecache::AppCommand::try_from(cmd) {
            Ok(command) => quotecache::run_command(command, cli.config_path.as_deref()).await,
            Err(e) => Err(e),
        },
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
