//! Download command implementation

use anyhow::Result;
use chrono::NaiveDate;
use orb_backtest::data::{self, DataProvider, DataRange, DataRequest, YahooProvider};
use std::path::PathBuf;
use tracing::info;

pub fn run(
    symbol: String,
    interval: String,
    period: String,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output: PathBuf,
) -> Result<()> {
    let range = match (start, end) {
        (Some(start), Some(end)) => {
            anyhow::ensure!(start < end, "Start date {} must be before end date {}", start, end);
            DataRange::Between { start, end }
        }
        (None, None) => DataRange::Trailing(period),
        _ => anyhow::bail!("--start and --end must be given together"),
    };

    let request = DataRequest {
        symbol,
        interval,
        range,
    };
    info!(
        "Downloading {} {} bars ({})",
        request.symbol, request.interval, request.range
    );

    let bars = YahooProvider::new()?.fetch(&request)?;
    let path = data::save_csv(&bars, &output)?;

    println!("Saved {} bars to {}", bars.len(), path.display());
    Ok(())
}
