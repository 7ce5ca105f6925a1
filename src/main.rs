//! Opening range breakout backtester - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Detect breakouts and simulate trades
//! - sweep: Grid search over stop-loss / take-profit
//! - download: Fetch intraday bars and save them as CSV

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "orb-backtest")]
#[command(about = "Opening range breakout detection and stop/target backtesting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Data selection and session overrides shared by backtest and sweep
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Load bars from this CSV file instead of fetching
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Instrument symbol
    #[arg(long)]
    pub symbol: Option<String>,

    /// Bar interval, e.g. "5m"
    #[arg(long)]
    pub interval: Option<String>,

    /// Trailing period, e.g. "45d" (ignored when --start and --end are set)
    #[arg(long)]
    pub period: Option<String>,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD, exclusive)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Session open (HH:MM)
    #[arg(long)]
    pub open_time: Option<String>,

    /// Session close (HH:MM)
    #[arg(long)]
    pub close_time: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the breakout backtest
    Backtest {
        #[command(flatten)]
        run: RunArgs,

        /// Stop-loss in percent (0.3 = 0.3%)
        #[arg(long)]
        stop_loss: Option<f64>,

        /// Take-profit in percent (0.6 = 0.6%)
        #[arg(long)]
        take_profit: Option<f64>,

        /// Same-bar tie break: take_profit_first or stop_loss_first
        #[arg(long)]
        intrabar: Option<String>,

        /// Trades open at end of data: mark_to_last, flat or exclude
        #[arg(long)]
        open_trades: Option<String>,

        /// Write trades, signals, equity curve and summary to the results directory
        #[arg(long)]
        export: bool,

        /// Results directory (overrides config)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Grid search over stop-loss and take-profit
    Sweep {
        #[command(flatten)]
        run: RunArgs,

        /// Stop-loss values in percent (comma-separated). E.g., "0.2,0.3,0.4"
        #[arg(long)]
        stop_loss: Option<String>,

        /// Take-profit values in percent (comma-separated). E.g., "0.4,0.6,0.8"
        #[arg(long)]
        take_profit: Option<String>,

        /// Sort results by metric (sharpe, return, win_rate, drawdown)
        #[arg(long, default_value = "sharpe")]
        sort_by: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Download intraday bars from Yahoo Finance
    Download {
        /// Instrument symbol
        #[arg(short, long, default_value = "NQ=F")]
        symbol: String,

        /// Bar interval
        #[arg(short, long, default_value = "5m")]
        interval: String,

        /// Trailing period (ignored when --start and --end are set)
        #[arg(short, long, default_value = "45d")]
        period: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD, exclusive)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Output CSV file
        #[arg(short, long, default_value = "data/NQ_5m.csv")]
        output: PathBuf,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // RUST_LOG wins; HTTP stack stays at warn
    let level = if verbose { "debug" } else { "info" };
    let default_filter = format!("{},hyper=warn,hyper_util=warn,reqwest=warn,h2=warn", level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Progress bar owns the terminal
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Writing {} log to {}", command_name, log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Sweep { .. } => ("sweep", true),
        Commands::Download { .. } => ("download", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            run,
            stop_loss,
            take_profit,
            intrabar,
            open_trades,
            export,
            output,
        } => commands::backtest::run(
            run,
            commands::backtest::TradeOverrides {
                stop_loss,
                take_profit,
                intrabar,
                open_trades,
            },
            export,
            output,
        ),

        Commands::Sweep {
            run,
            stop_loss,
            take_profit,
            sort_by,
            top,
            sequential,
        } => commands::sweep::run(run, stop_loss, take_profit, sort_by, top, sequential),

        Commands::Download {
            symbol,
            interval,
            period,
            start,
            end,
            output,
        } => commands::download::run(symbol, interval, period, start, end, output),
    }
}
