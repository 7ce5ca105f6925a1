//! Opening range breakout detection
//!
//! For each weekday session: compute the opening range, then emit a signal for
//! the first later bar whose high or low pierces it. At most one signal per
//! session. Sparse or irregular data never fails detection; sessions that can't
//! be evaluated are skipped and counted in [`DetectionStats`].

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::data::BarSeries;
use crate::session::{is_weekend, trading_days, OpeningRange, Session};
use crate::{Bar, Direction, SignalEvent};

/// Why a session produced no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSkip {
    /// No bars inside regular hours
    Empty,
    /// Fewer bars than `min_session_bars` (holiday or partial data)
    TooFewBars,
    /// No bars inside the opening range window
    NoOpeningRange,
    /// Opening range narrower than `min_range_pct`
    LowVolatility,
    /// Range held for the rest of the session
    NoBreakout,
}

/// Counters describing a detection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionStats {
    pub weekend_bars: usize,
    pub sessions: usize,
    pub signals: usize,
    pub empty: usize,
    pub too_few_bars: usize,
    pub no_opening_range: usize,
    pub low_volatility: usize,
    pub no_breakout: usize,
}

impl DetectionStats {
    fn record(&mut self, skip: SessionSkip) {
        match skip {
            SessionSkip::Empty => self.empty += 1,
            SessionSkip::TooFewBars => self.too_few_bars += 1,
            SessionSkip::NoOpeningRange => self.no_opening_range += 1,
            SessionSkip::LowVolatility => self.low_volatility += 1,
            SessionSkip::NoBreakout => self.no_breakout += 1,
        }
    }
}

/// Signals in timestamp order plus run statistics
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub signals: Vec<SignalEvent>,
    pub stats: DetectionStats,
}

/// Opening range breakout detector
#[derive(Debug, Clone, Default)]
pub struct BreakoutDetector {
    config: SessionConfig,
}

impl BreakoutDetector {
    pub fn new(config: SessionConfig) -> Self {
        BreakoutDetector { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Scan every session in date order
    pub fn detect(&self, bars: &BarSeries) -> Detection {
        let mut detection = Detection::default();

        for day in trading_days(bars.bars()) {
            let Some(session) = Session::from_day(day, &self.config) else {
                continue;
            };

            if is_weekend(session.date) {
                detection.stats.weekend_bars += day.len();
                continue;
            }

            detection.stats.sessions += 1;
            match self.detect_session(&session) {
                Ok(signal) => {
                    debug!(
                        "{}: {} breakout at {} (range {:.2}-{:.2})",
                        session.date,
                        signal.direction,
                        signal.timestamp.time(),
                        signal.range_low,
                        signal.range_high
                    );
                    detection.signals.push(signal);
                }
                Err(skip) => {
                    debug!("{}: skipped ({:?}, {} bars)", session.date, skip, session.len());
                    detection.stats.record(skip);
                }
            }
        }

        detection.stats.signals = detection.signals.len();
        info!(
            "Detected {} signals in {} sessions ({} too short, {} low volatility, {} without breakout)",
            detection.stats.signals,
            detection.stats.sessions,
            detection.stats.too_few_bars,
            detection.stats.low_volatility,
            detection.stats.no_breakout
        );

        detection
    }

    /// Evaluate a single session
    pub fn detect_session(&self, session: &Session<'_>) -> Result<SignalEvent, SessionSkip> {
        if session.is_empty() {
            return Err(SessionSkip::Empty);
        }
        if session.len() < self.config.min_session_bars {
            return Err(SessionSkip::TooFewBars);
        }

        let range = session
            .opening_range(&self.config)
            .ok_or(SessionSkip::NoOpeningRange)?;

        if range.width_pct() < self.config.min_range_pct {
            return Err(SessionSkip::LowVolatility);
        }

        first_breakout(session.after_range(&self.config), &range).ok_or(SessionSkip::NoBreakout)
    }
}

/// First bar piercing the range; a bar breaking both sides counts as long
pub fn first_breakout(bars: &[Bar], range: &OpeningRange) -> Option<SignalEvent> {
    bars.iter().find_map(|bar| {
        let direction = if bar.high > range.high {
            Direction::Long
        } else if bar.low < range.low {
            Direction::Short
        } else {
            return None;
        };

        Some(SignalEvent {
            timestamp: bar.timestamp,
            direction,
            range_high: range.high,
            range_low: range.low,
        })
    })
}

/// Detect signals with the given session parameters
pub fn detect(bars: &BarSeries, config: &SessionConfig) -> Vec<SignalEvent> {
    BreakoutDetector::new(config.clone()).detect(bars).signals
}
