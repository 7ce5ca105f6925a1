//! Command implementations

pub mod backtest;
pub mod download;
pub mod sweep;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use orb_backtest::data::{BarSeries, CsvProvider, DataProvider, DataRequest, YahooProvider};
use orb_backtest::Config;
use tracing::info;

use crate::RunArgs;

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .context(format!("Invalid time (expected HH:MM): {}", value))
}

/// Load the config file (or defaults) and apply command-line overrides
pub fn load_config(args: &RunArgs) -> Result<Config> {
    let config = Config::load(args.config.as_deref())?;
    if let Some(path) = &args.config {
        info!("Loaded configuration from: {}", path.display());
    }
    apply_overrides(config, args)
}

/// Command-line flags take precedence over the file and the environment
fn apply_overrides(mut config: Config, args: &RunArgs) -> Result<Config> {
    if let Some(data) = &args.data {
        config.data.csv_path = Some(data.display().to_string());
    }
    if let Some(symbol) = &args.symbol {
        config.data.symbol = symbol.clone();
    }
    if let Some(interval) = &args.interval {
        config.data.interval = interval.clone();
    }
    if let Some(period) = &args.period {
        config.data.period = period.clone();
    }
    if args.start.is_some() {
        config.data.start = args.start;
    }
    if args.end.is_some() {
        config.data.end = args.end;
    }
    if let Some(open) = &args.open_time {
        config.session.open_time = parse_hhmm(open)?;
    }
    if let Some(close) = &args.close_time {
        config.session.close_time = parse_hhmm(close)?;
    }

    config.validate()?;
    Ok(config)
}

/// Fetch bars from the CSV file when configured, otherwise from Yahoo Finance
pub fn load_bars(config: &Config) -> Result<BarSeries> {
    let request = DataRequest {
        symbol: config.data.symbol.clone(),
        interval: config.data.interval.clone(),
        range: config.data.range(),
    };

    let bars = match &config.data.csv_path {
        Some(path) => CsvProvider::new(path).fetch(&request)?,
        None => YahooProvider::new()?.fetch(&request)?,
    };

    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        info!(
            "Loaded {} bars: {} to {}",
            bars.len(),
            first.timestamp,
            last.timestamp
        );
    }
    Ok(bars)
}
