//! Session partitioning and opening range computation
//!
//! A session is one calendar day's bars inside the regular-hours window. Bars
//! in a [`BarSeries`](crate::data::BarSeries) are strictly ordered, so every
//! day and every time window within a day is a contiguous slice.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::config::SessionConfig;
use crate::Bar;

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Split ordered bars into per-date slices
pub fn trading_days(bars: &[Bar]) -> impl Iterator<Item = &[Bar]> {
    bars.chunk_by(|a, b| a.timestamp.date() == b.timestamp.date())
}

fn time_of(bar: &Bar) -> NaiveTime {
    bar.timestamp.time()
}

/// High/low bracket of the first minutes of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpeningRange {
    pub high: f64,
    pub low: f64,
    /// Timestamp of the last bar inside the window
    pub last_bar: NaiveDateTime,
    pub bar_count: usize,
}

impl OpeningRange {
    /// Range width relative to the low, e.g. 0.004 = 0.4%
    pub fn width_pct(&self) -> f64 {
        (self.high - self.low) / self.low
    }
}

/// One calendar day's regular-hours bars
#[derive(Debug, Clone, Copy)]
pub struct Session<'a> {
    pub date: NaiveDate,
    pub bars: &'a [Bar],
}

impl<'a> Session<'a> {
    /// Restrict one day's bars to `[open_time, close_time]`
    pub fn from_day(day: &'a [Bar], config: &SessionConfig) -> Option<Self> {
        let date = day.first()?.timestamp.date();
        let start = day.partition_point(|b| time_of(b) < config.open_time);
        let end = day.partition_point(|b| time_of(b) <= config.close_time);

        Some(Session {
            date,
            bars: &day[start..end.max(start)],
        })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Number of leading bars inside `[open_time, open_time + opening_range_minutes]`
    fn range_len(&self, config: &SessionConfig) -> usize {
        let range_end = config.opening_range_end();
        self.bars.partition_point(|b| time_of(b) <= range_end)
    }

    pub fn opening_range(&self, config: &SessionConfig) -> Option<OpeningRange> {
        let window = &self.bars[..self.range_len(config)];
        let last = window.last()?;

        let (high, low) = window
            .iter()
            .fold((f64::MIN, f64::MAX), |(h, l), b| (h.max(b.high), l.min(b.low)));

        Some(OpeningRange {
            high,
            low,
            last_bar: last.timestamp,
            bar_count: window.len(),
        })
    }

    /// Bars strictly after the opening range window
    pub fn after_range(&self, config: &SessionConfig) -> &'a [Bar] {
        &self.bars[self.range_len(config)..]
    }
}
