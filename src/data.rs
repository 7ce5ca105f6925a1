//! Data loading and management
//!
//! Holds the validated [`BarSeries`], CSV loading/saving, and the market data
//! providers that feed the detector. Providers are responsible for handing back
//! bars with a strictly increasing, deduplicated, timezone-free index.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{Bar, BarValidationError};

// =============================================================================
// Bar Series
// =============================================================================

/// Structural problems that make a bar series unusable
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("invalid bar at index {index} ({timestamp}): {source}")]
    InvalidBar {
        index: usize,
        timestamp: NaiveDateTime,
        #[source]
        source: BarValidationError,
    },

    #[error("timestamps must be strictly increasing: index {index} ({timestamp}) follows {previous}")]
    OutOfOrder {
        index: usize,
        previous: NaiveDateTime,
        timestamp: NaiveDateTime,
    },
}

/// Time-ordered bars for a single instrument
///
/// Every bar satisfies the OHLC invariants and timestamps are strictly increasing,
/// so lookups by timestamp can binary search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> Result<Self, SeriesError> {
        for (index, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|source| SeriesError::InvalidBar {
                index,
                timestamp: bar.timestamp,
                source,
            })?;
        }

        if let Some((index, pair)) = bars
            .windows(2)
            .enumerate()
            .find(|(_, w)| w[1].timestamp <= w[0].timestamp)
        {
            return Err(SeriesError::OutOfOrder {
                index: index + 1,
                previous: pair[0].timestamp,
                timestamp: pair[1].timestamp,
            });
        }

        Ok(Self { bars })
    }

    /// Sort by timestamp and drop duplicate timestamps (first occurrence wins) before validating
    pub fn from_unsorted(mut bars: Vec<Bar>) -> Result<Self, SeriesError> {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Self::new(bars)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Index of the bar with exactly this timestamp
    pub fn index_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        self.bars
            .binary_search_by_key(&timestamp, |b| b.timestamp)
            .ok()
    }

    /// Bars at or after `timestamp`, or `None` if no bar has exactly that timestamp
    pub fn from_timestamp(&self, timestamp: NaiveDateTime) -> Option<&[Bar]> {
        self.index_of(timestamp).map(|i| &self.bars[i..])
    }

    /// Keep the bars matching `predicate`; order and invariants are preserved
    pub fn filtered(&self, predicate: impl Fn(&Bar) -> bool) -> BarSeries {
        BarSeries {
            bars: self.bars.iter().filter(|b| predicate(b)).cloned().collect(),
        }
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }
}

impl AsRef<[Bar]> for BarSeries {
    fn as_ref(&self) -> &[Bar] {
        &self.bars
    }
}

impl<'a> IntoIterator for &'a BarSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a timestamp, dropping any UTC offset (the wall-clock time is kept)
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .context(format!("Failed to parse datetime: {}", s))
}

/// Column positions resolved from a CSV header
struct Columns {
    datetime: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };

        Ok(Columns {
            datetime: find(&["datetime", "timestamp", "date", "time"])
                .context("Missing datetime column")?,
            open: find(&["open"]).context("Missing open column")?,
            high: find(&["high"]).context("Missing high column")?,
            low: find(&["low"]).context("Missing low column")?,
            close: find(&["close"]).context("Missing close column")?,
            volume: find(&["volume"]),
        })
    }
}

fn parse_field(record: &csv::StringRecord, index: usize, name: &str, row: usize) -> Result<f64> {
    record
        .get(index)
        .filter(|s| !s.trim().is_empty())
        .context(format!("Missing {} at row {}", name, row))?
        .trim()
        .parse()
        .context(format!("Failed to parse {} at row {}", name, row))
}

/// Load OHLCV bars from a CSV file
///
/// Columns are matched by header name (case-insensitive), so both
/// `datetime,open,high,low,close,volume` and Yahoo-style
/// `Datetime,Open,High,Low,Close,Adj Close,Volume` files load. A missing or
/// unparsable price field aborts the load.
pub fn load_csv(path: impl AsRef<Path>) -> Result<BarSeries> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .context(format!("Failed to open CSV file {}", path.display()))?;
    let columns = Columns::from_headers(reader.headers().context("Failed to read CSV header")?)?;

    let mut bars = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 2; // 1-indexed plus header
        let record = result.context(format!("Failed to read row {}", row))?;

        let dt_str = record
            .get(columns.datetime)
            .context(format!("Missing datetime at row {}", row))?;
        let timestamp = parse_timestamp(dt_str)?;

        let volume = match columns.volume {
            Some(i) => parse_field(&record, i, "volume", row)?.max(0.0).round() as u64,
            None => 0,
        };

        bars.push(Bar::new_unchecked(
            timestamp,
            parse_field(&record, columns.open, "open", row)?,
            parse_field(&record, columns.high, "high", row)?,
            parse_field(&record, columns.low, "low", row)?,
            parse_field(&record, columns.close, "close", row)?,
            volume,
        ));
    }

    let series = BarSeries::new(bars).context(format!("Invalid bar data in {}", path.display()))?;
    debug!("Loaded {} bars from {}", series.len(), path.display());
    Ok(series)
}

/// Save bars to a CSV file readable by [`load_csv`]
pub fn save_csv(bars: &BarSeries, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    let mut writer = csv::Writer::from_path(path).context("Failed to create output file")?;
    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;

    for bar in bars {
        writer.write_record(&[
            bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ])?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", bars.len(), path.display());
    Ok(path.to_path_buf())
}

// =============================================================================
// Data Providers
// =============================================================================

/// Time window to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRange {
    /// Calendar dates, start inclusive, end exclusive
    Between { start: NaiveDate, end: NaiveDate },
    /// Trailing period ending now (or at the last available bar), e.g. "45d"
    Trailing(String),
}

impl std::fmt::Display for DataRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataRange::Between { start, end } => write!(f, "{} to {}", start, end),
            DataRange::Trailing(period) => write!(f, "last {}", period),
        }
    }
}

/// What to fetch from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub symbol: String,
    pub interval: String,
    pub range: DataRange,
}

/// Source of bar series for one instrument
pub trait DataProvider {
    /// Fetch bars for the request. An empty result is reported as an error.
    fn fetch(&self, request: &DataRequest) -> Result<BarSeries>;
}

/// Parse a trailing period such as "45d", "2wk", "3mo" or "1y"
pub fn parse_period(period: &str) -> Result<Duration> {
    let period = period.trim().to_lowercase();
    let split = period
        .find(|c: char| !c.is_ascii_digit())
        .context(format!("Period has no unit: {}", period))?;
    let (count, unit) = period.split_at(split);
    let count: i64 = count
        .parse()
        .context(format!("Invalid period count: {}", period))?;

    let days_per_unit = match unit {
        "d" => 1,
        "wk" | "w" => 7,
        "mo" => 30,
        "y" => 365,
        _ => anyhow::bail!("Unknown period unit '{}' in {}", unit, period),
    };
    count
        .checked_mul(days_per_unit)
        .and_then(Duration::try_days)
        .context(format!("Period out of range: {}", period))
}

/// Bars loaded from a CSV file, restricted to the requested window
pub struct CsvProvider {
    path: PathBuf,
}

impl CsvProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DataProvider for CsvProvider {
    fn fetch(&self, request: &DataRequest) -> Result<BarSeries> {
        let series = load_csv(&self.path)?;

        let series = match &request.range {
            DataRange::Between { start, end } => {
                series.filtered(|b| b.timestamp.date() >= *start && b.timestamp.date() < *end)
            }
            DataRange::Trailing(period) => {
                let span = parse_period(period)?;
                let cutoff = series
                    .last()
                    .map(|last| {
                        last.timestamp
                            .checked_sub_signed(span)
                            .context(format!("Period out of range: {}", period))
                    })
                    .transpose()?;
                match cutoff {
                    Some(cutoff) => series.filtered(|b| b.timestamp > cutoff),
                    None => series,
                }
            }
        };

        if series.is_empty() {
            anyhow::bail!(
                "No data for {} ({}) in {}",
                request.symbol,
                request.range,
                self.path.display()
            );
        }

        info!(
            "Loaded {} bars for {} ({}) from {}",
            series.len(),
            request.symbol,
            request.range,
            self.path.display()
        );
        Ok(series)
    }
}

// =============================================================================
// Yahoo Finance Provider
// =============================================================================

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; orb-backtest/0.1)";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
    #[serde(default)]
    trading_periods: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TradingPeriod {
    start: i64,
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartMeta {
    /// Per-day UTC offsets (handles DST inside the window), sorted by period start
    fn offsets(&self) -> Vec<(i64, i64)> {
        let periods: Vec<Vec<TradingPeriod>> = self
            .trading_periods
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let mut offsets: Vec<(i64, i64)> = periods
            .into_iter()
            .flatten()
            .map(|p| (p.start, p.gmtoffset))
            .collect();
        offsets.sort_unstable();
        offsets
    }
}

/// Intraday bars from the Yahoo Finance chart API
///
/// Rows with any missing field are dropped and timestamps are shifted to
/// exchange-local wall-clock time.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
}

impl YahooProvider {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    fn query(request: &DataRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("interval", request.interval.clone()),
            ("includePrePost", "false".to_string()),
        ];
        match &request.range {
            DataRange::Between { start, end } => {
                let to_unix = |d: &NaiveDate| d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
                query.push(("period1", to_unix(start).to_string()));
                query.push(("period2", to_unix(end).to_string()));
            }
            DataRange::Trailing(period) => query.push(("range", period.clone())),
        }
        query
    }

    fn parse(result: ChartResult) -> Result<Vec<Bar>> {
        let offsets = result.meta.offsets();
        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

        let mut bars = Vec::with_capacity(result.timestamp.len());
        let mut dropped = 0usize;

        for (i, &ts) in result.timestamp.iter().enumerate() {
            let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
            let (Some(open), Some(high), Some(low), Some(close)) = (
                field(&quote.open),
                field(&quote.high),
                field(&quote.low),
                field(&quote.close),
            ) else {
                dropped += 1;
                continue;
            };

            let offset = match offsets.partition_point(|(start, _)| *start <= ts) {
                0 => result.meta.gmtoffset,
                n => offsets[n - 1].1,
            };
            let Some(utc) = DateTime::<Utc>::from_timestamp(ts + offset, 0) else {
                dropped += 1;
                continue;
            };

            let volume = field(&quote.volume).unwrap_or(0.0).max(0.0).round() as u64;
            match Bar::new(utc.naive_utc(), open, high, low, close, volume) {
                Ok(bar) => bars.push(bar),
                Err(e) => {
                    dropped += 1;
                    warn!("Dropping invalid bar at {}: {}", ts, e);
                }
            }
        }

        if dropped > 0 {
            debug!("Dropped {} incomplete rows", dropped);
        }
        Ok(bars)
    }
}

impl DataProvider for YahooProvider {
    fn fetch(&self, request: &DataRequest) -> Result<BarSeries> {
        info!(
            "Fetching {} {} bars ({}) from Yahoo Finance",
            request.symbol, request.interval, request.range
        );

        let url = format!("{}/{}", YAHOO_CHART_URL, request.symbol);
        let response = self
            .client
            .get(&url)
            .query(&Self::query(request))
            .send()
            .context("Failed to send request")?;

        if !response.status().is_success() {
            anyhow::bail!("Yahoo Finance returned status: {}", response.status());
        }

        let body: ChartResponse = response.json().context("Failed to parse chart response")?;
        if let Some(err) = body.chart.error {
            anyhow::bail!("Yahoo Finance error {}: {}", err.code, err.description);
        }

        let result = body
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .context(format!("No data returned for {}", request.symbol))?;

        let series = BarSeries::from_unsorted(Self::parse(result)?)?;
        if series.is_empty() {
            anyhow::bail!("No data for {} ({})", request.symbol, request.range);
        }

        info!("Fetched {} bars for {}", series.len(), request.symbol);
        Ok(series)
    }
}
