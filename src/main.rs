use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use swingcraft::commands::{backtest, enrich_snapshot, paper};

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "swingcraft")]
#[command(about = "Signal-driven swing-trade backtesting and paper trading")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars against classifier signals and report performance
    Backtest {
        /// Tickers to simulate (defaults to every ticker in the snapshot)
        tickers: Vec<String>,
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Starting capital
        #[arg(long)]
        capital: Option<f64>,
        /// Maximum fraction of capital per position (0..1)
        #[arg(long = "position-size")]
        position_size: Option<f64>,
        /// Stop-loss fraction below entry (0..1)
        #[arg(long = "stop-loss")]
        stop_loss: Option<f64>,
        /// Transaction cost rate per leg (0..1)
        #[arg(long)]
        cost: Option<f64>,
        /// Trailing window of history to request, in days
        #[arg(long = "period-days")]
        period_days: Option<usize>,
        /// Write the full JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Poll live quotes and trade virtual capital on classifier signals
    Paper {
        /// Watchlist tickers
        tickers: Vec<String>,
        /// Path to the market data snapshot file (signal history)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Base URL of the quote endpoint
        #[arg(long = "quote-url")]
        quote_url: String,
        /// Seconds between polling cycles
        #[arg(long = "interval-secs", default_value_t = 300)]
        interval_secs: u64,
        /// Stop after this many cycles (runs until ctrl-c when omitted)
        #[arg(long)]
        cycles: Option<u32>,
        /// Starting virtual capital
        #[arg(long)]
        capital: Option<f64>,
    },
    /// Fill indicator columns and signal labels on a raw snapshot
    EnrichSnapshot {
        /// Snapshot to read
        #[arg(short, long)]
        input: PathBuf,
        /// Where to write the enriched snapshot
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting swingcraft. Not financial advice. Most retail traders lose money. Use at your own risk.");

    match cli.command {
        Commands::Backtest {
            tickers,
            data_file,
            capital,
            position_size,
            stop_loss,
            cost,
            period_days,
            output,
        } => {
            backtest::run(backtest::BacktestArgs {
                data_file: resolve_market_data_path(data_file),
                tickers,
                capital,
                position_size,
                stop_loss,
                cost,
                period_days,
                output,
            })
            .await?;
        }
        Commands::Paper {
            tickers,
            data_file,
            quote_url,
            interval_secs,
            cycles,
            capital,
        } => {
            paper::run(paper::PaperArgs {
                data_file: resolve_market_data_path(data_file),
                tickers,
                quote_url,
                interval_secs,
                cycles,
                capital,
            })
            .await?;
        }
        Commands::EnrichSnapshot { input, output } => {
            enrich_snapshot::run(&input, &output)?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
