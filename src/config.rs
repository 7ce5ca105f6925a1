//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides for the trade thresholds. Every section is optional in the
//! file; missing fields fall back to the documented defaults.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::data::DataRange;

/// Invalid configuration values
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("session close ({close}) must be after session open ({open})")]
    InvertedSession { open: NaiveTime, close: NaiveTime },

    #[error("opening range ({minutes} min) must be positive and end before the session closes")]
    InvalidOpeningRange { minutes: u32 },

    #[error("{name} must be positive and finite, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("min_range_pct must be >= 0, got {0}")]
    NegativeRangeFilter(f64),

    #[error("start date ({start}) must be before end date ({end})")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("start and end dates must be given together")]
    IncompleteDateRange,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub trade: TradeConfig,
    pub data: DataConfig,
    pub sweep: SweepConfig,
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config = Self::from_json(&contents)?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse and validate JSON without consulting the environment
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file when a path is given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Config::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Thresholds may be overridden from the environment (fractions, e.g. 0.003)
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("ORB_STOP_LOSS_PCT") {
            self.trade.stop_loss_pct = value
                .parse()
                .context(format!("Invalid ORB_STOP_LOSS_PCT: {}", value))?;
        }
        if let Ok(value) = std::env::var("ORB_TAKE_PROFIT_PCT") {
            self.trade.take_profit_pct = value
                .parse()
                .context(format!("Invalid ORB_TAKE_PROFIT_PCT: {}", value))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.trade.validate()?;
        self.data.validate()
    }
}

/// Regular-hours session and opening range parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session open, "HH:MM" (default "09:30")
    #[serde(with = "hhmm")]
    pub open_time: NaiveTime,
    /// Session close, "HH:MM" (default "16:00"); bars at exactly this time are included
    #[serde(with = "hhmm")]
    pub close_time: NaiveTime,
    /// Length of the opening range window after the open (default 15)
    pub opening_range_minutes: u32,
    /// Sessions with fewer regular-hours bars are treated as incomplete (default 30)
    pub min_session_bars: usize,
    /// Minimum (high - low) / low of the opening range; 0 disables (default 0.0015)
    pub min_range_pct: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            open_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            opening_range_minutes: 15,
            min_session_bars: 30,
            min_range_pct: 0.0015,
        }
    }
}

impl SessionConfig {
    /// Last timestamp (inclusive) of the opening range window
    pub fn opening_range_end(&self) -> NaiveTime {
        self.open_time + Duration::minutes(i64::from(self.opening_range_minutes))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.close_time <= self.open_time {
            return Err(ConfigError::InvertedSession {
                open: self.open_time,
                close: self.close_time,
            });
        }
        let range_end = self.opening_range_end();
        if self.opening_range_minutes == 0
            || range_end >= self.close_time
            || range_end <= self.open_time
        {
            return Err(ConfigError::InvalidOpeningRange {
                minutes: self.opening_range_minutes,
            });
        }
        if self.min_range_pct.is_nan() || self.min_range_pct < 0.0 {
            return Err(ConfigError::NegativeRangeFilter(self.min_range_pct));
        }
        Ok(())
    }
}

/// Which threshold wins when a single bar crosses both
///
/// Bars only carry high/low, so there is no way to know which level traded first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrabarPriority {
    #[default]
    TakeProfitFirst,
    StopLossFirst,
}

/// What to do with a trade still open when the data runs out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenTradePolicy {
    /// Exit at the close of the last available bar
    #[default]
    MarkToLast,
    /// Exit at the entry price (zero return)
    Flat,
    /// Record no trade
    Exclude,
}

impl std::str::FromStr for IntrabarPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "take_profit_first" | "take_profit" | "tp" => Ok(IntrabarPriority::TakeProfitFirst),
            "stop_loss_first" | "stop_loss" | "sl" => Ok(IntrabarPriority::StopLossFirst),
            _ => Err(format!(
                "Unknown intrabar priority: {}. Use 'take_profit_first' or 'stop_loss_first'",
                s
            )),
        }
    }
}

impl std::str::FromStr for OpenTradePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "mark_to_last" | "last" => Ok(OpenTradePolicy::MarkToLast),
            "flat" => Ok(OpenTradePolicy::Flat),
            "exclude" => Ok(OpenTradePolicy::Exclude),
            _ => Err(format!(
                "Unknown open trade policy: {}. Use 'mark_to_last', 'flat' or 'exclude'",
                s
            )),
        }
    }
}

/// Exit rules for simulated trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    /// Adverse move that closes the trade, as a fraction (0.003 = 0.3%)
    pub stop_loss_pct: f64,
    /// Favorable move that closes the trade, as a fraction (0.006 = 0.6%)
    pub take_profit_pct: f64,
    pub intrabar_priority: IntrabarPriority,
    pub open_trade_policy: OpenTradePolicy,
}

impl Default for TradeConfig {
    fn default() -> Self {
        TradeConfig {
            stop_loss_pct: 0.003,
            take_profit_pct: 0.006,
            intrabar_priority: IntrabarPriority::default(),
            open_trade_policy: OpenTradePolicy::default(),
        }
    }
}

impl TradeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

/// Market data source selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Load bars from this CSV file instead of fetching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<String>,
    pub symbol: String,
    pub interval: String,
    /// Trailing period such as "45d"; used when start/end are not both set
    pub period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    pub results_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            csv_path: None,
            symbol: "NQ=F".to_string(),
            interval: "5m".to_string(),
            period: "45d".to_string(),
            start: None,
            end: None,
            results_dir: "results".to_string(),
        }
    }
}

impl DataConfig {
    /// Explicit window when both dates are set, trailing period otherwise
    pub fn range(&self) -> DataRange {
        match (self.start, self.end) {
            (Some(start), Some(end)) => DataRange::Between { start, end },
            _ => DataRange::Trailing(self.period.clone()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start >= end => {
                Err(ConfigError::InvalidDateRange { start, end })
            }
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::IncompleteDateRange),
            _ => Ok(()),
        }
    }
}

/// Stop/target grid for the parameter sweep (fractions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub stop_loss_pcts: Vec<f64>,
    pub take_profit_pcts: Vec<f64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            stop_loss_pcts: vec![0.002, 0.003, 0.004, 0.005],
            take_profit_pcts: vec![0.004, 0.006, 0.008, 0.010, 0.012],
        }
    }
}

/// Serde for "HH:MM" session times
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
