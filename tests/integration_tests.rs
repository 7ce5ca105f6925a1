//! Integration tests for the ORB backtester
//!
//! These tests run the whole pipeline: CSV on disk, breakout detection,
//! trade simulation and reporting.

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt::Write as _;
use std::path::PathBuf;

use orb_backtest::backtest::{self, TradeSimulator};
use orb_backtest::breakout::{self, BreakoutDetector};
use orb_backtest::config::{OpenTradePolicy, TradeConfig};
use orb_backtest::data::{self, BarSeries, CsvProvider, DataProvider, DataRange, DataRequest};
use orb_backtest::optimize::{self, Optimizer, SortMetric};
use orb_backtest::{report, risk, Bar, Config, Direction, ExitReason};

// =============================================================================
// Test Utilities
// =============================================================================

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// One 5-minute bar per slot from `from` to `to` inclusive, quiet around 100
fn quiet_bars(date: NaiveDate, from: (u32, u32), to: (u32, u32)) -> Vec<Bar> {
    let start = date.and_hms_opt(from.0, from.1, 0).unwrap();
    let end = date.and_hms_opt(to.0, to.1, 0).unwrap();
    let mut bars = Vec::new();
    let mut ts = start;
    while ts <= end {
        bars.push(Bar::new_unchecked(ts, 100.0, 101.0, 99.0, 100.0, 1_000));
        ts += Duration::minutes(5);
    }
    bars
}

fn replace(bars: &mut [Bar], ts: NaiveDateTime, open: f64, high: f64, low: f64, close: f64) {
    let bar = bars
        .iter_mut()
        .find(|b| b.timestamp == ts)
        .expect("bar exists");
    *bar = Bar::new(ts, open, high, low, close, 1_000).expect("valid bar");
}

/// Session with a 98-102 opening range that breaks at 09:50
fn breakout_day(date: NaiveDate, direction: Direction) -> Vec<Bar> {
    let mut bars = quiet_bars(date, (9, 30), (16, 0));
    for minute in [30, 35, 40, 45] {
        replace(&mut bars, date.and_hms_opt(9, minute, 0).unwrap(), 100.0, 102.0, 98.0, 100.0);
    }
    match direction {
        Direction::Long => {
            // entry 102.5, take-profit 103.115 reached at 09:55
            replace(&mut bars, date.and_hms_opt(9, 50, 0).unwrap(), 102.5, 103.0, 102.4, 102.5);
            replace(&mut bars, date.and_hms_opt(9, 55, 0).unwrap(), 102.6, 103.2, 102.6, 103.0);
        }
        Direction::Short => {
            // entry 97.6, stop-loss 97.8928 reached at 09:55
            replace(&mut bars, date.and_hms_opt(9, 50, 0).unwrap(), 97.7, 97.7, 97.5, 97.6);
            replace(&mut bars, date.and_hms_opt(9, 55, 0).unwrap(), 97.7, 98.0, 97.7, 97.9);
        }
    }
    bars
}

/// Two tradable sessions plus noise that must be ignored
fn sample_bars() -> Vec<Bar> {
    let mut bars = Vec::new();

    // Pre-market spike on the first day lies outside regular hours
    bars.push(Bar::new_unchecked(
        day(2024, 1, 2).and_hms_opt(9, 0, 0).unwrap(),
        100.0,
        150.0,
        50.0,
        100.0,
        10,
    ));
    bars.extend(breakout_day(day(2024, 1, 2), Direction::Long));
    bars.extend(breakout_day(day(2024, 1, 3), Direction::Short));
    // Half-day: too few bars
    bars.extend(quiet_bars(day(2024, 1, 4), (9, 30), (10, 15)));
    // Saturday
    bars.extend(breakout_day(day(2024, 1, 6), Direction::Long));
    bars
}

fn write_csv(name: &str, bars: &[Bar]) -> PathBuf {
    let mut out = String::from("datetime,open,high,low,close,volume\n");
    for b in bars {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        )
        .unwrap();
    }
    let path = std::env::temp_dir().join(format!("orb_{}_{}.csv", name, std::process::id()));
    std::fs::write(&path, out).unwrap();
    path
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[test]
fn test_csv_to_trades_pipeline() {
    let path = write_csv("pipeline", &sample_bars());
    let bars = data::load_csv(&path).unwrap();
    let config = Config::default();

    let detection = BreakoutDetector::new(config.session.clone()).detect(&bars);
    assert_eq!(detection.signals.len(), 2);
    assert_eq!(detection.stats.sessions, 3);
    assert_eq!(detection.stats.too_few_bars, 1);
    assert!(detection.stats.weekend_bars > 0);

    let long = &detection.signals[0];
    assert_eq!(long.direction, Direction::Long);
    assert_eq!(long.timestamp, day(2024, 1, 2).and_hms_opt(9, 50, 0).unwrap());
    assert_eq!((long.range_high, long.range_low), (102.0, 98.0));
    assert_eq!(detection.signals[1].direction, Direction::Short);

    let result = TradeSimulator::new(config.trade.clone()).run(&bars, &detection.signals);
    assert_eq!(result.trades.len(), 2);

    let win = &result.trades[0];
    assert_eq!(win.exit_reason, ExitReason::TakeProfit);
    assert_relative_eq!(win.entry_price, 102.5);
    assert_relative_eq!(win.exit_price, 102.5 * 1.006, epsilon = 1e-9);
    assert_relative_eq!(win.trade_return, 0.006, epsilon = 1e-12);

    let loss = &result.trades[1];
    assert_eq!(loss.exit_reason, ExitReason::StopLoss);
    assert_relative_eq!(loss.exit_price, 97.6 * 1.003, epsilon = 1e-9);
    assert_relative_eq!(loss.trade_return, -0.003, epsilon = 1e-12);

    assert_relative_eq!(loss.cumulative_equity, 1.006 * 0.997, epsilon = 1e-12);
    assert_relative_eq!(
        result.risk.max_drawdown.unwrap(),
        1.006 - 1.006 * 0.997,
        epsilon = 1e-12
    );

    // mean 0.0015, sample std 0.0045 * sqrt(2)
    let expected_sharpe = 0.0015 / (0.0045 * 2f64.sqrt()) * 252f64.sqrt();
    assert_relative_eq!(result.risk.sharpe_ratio.unwrap(), expected_sharpe, epsilon = 1e-9);

    assert_eq!(result.summary.total_trades, 2);
    assert_eq!(result.summary.winning_trades, 1);
    assert_relative_eq!(result.summary.win_rate, 0.5);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_csv_provider_restricts_window() {
    let path = write_csv("window", &sample_bars());
    let request = DataRequest {
        symbol: "NQ=F".to_string(),
        interval: "5m".to_string(),
        range: DataRange::Between {
            start: day(2024, 1, 3),
            end: day(2024, 1, 4),
        },
    };
    let bars = CsvProvider::new(&path).fetch(&request).unwrap();
    assert!(bars.iter().all(|b| b.timestamp.date() == day(2024, 1, 3)));

    let signals = breakout::detect(&bars, &Config::default().session);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].direction, Direction::Short);

    let empty = DataRequest {
        range: DataRange::Between {
            start: day(2023, 1, 1),
            end: day(2023, 2, 1),
        },
        ..request
    };
    assert!(CsvProvider::new(&path).fetch(&empty).is_err());

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_unsorted_csv_rejected() {
    let mut bars = sample_bars();
    bars.swap(3, 4);
    let path = write_csv("unsorted", &bars);
    assert!(data::load_csv(&path).is_err());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_no_signals_gives_empty_result() {
    let bars = BarSeries::new(quiet_bars(day(2024, 1, 2), (9, 30), (16, 0))).unwrap();
    let signals = breakout::detect(&bars, &Config::default().session);
    assert!(signals.is_empty());

    let result = backtest::simulate(&bars, &signals, &TradeConfig::default());
    assert!(result.trades.is_empty());
    assert_eq!(result.risk.sharpe_ratio, None);
    assert_eq!(result.risk.max_drawdown, None);
}

#[test]
fn test_open_trade_at_end_of_data() {
    // Breakout on the last bar of the data: no later bar can hit a threshold
    let date = day(2024, 1, 2);
    let mut bars = quiet_bars(date, (9, 30), (16, 0));
    for minute in [30, 35, 40, 45] {
        replace(&mut bars, date.and_hms_opt(9, minute, 0).unwrap(), 100.0, 102.0, 98.0, 100.0);
    }
    replace(&mut bars, date.and_hms_opt(16, 0, 0).unwrap(), 102.0, 102.1, 102.0, 102.05);
    let bars = BarSeries::new(bars).unwrap();

    let signals = breakout::detect(&bars, &Config::default().session);
    assert_eq!(signals.len(), 1);

    let marked = backtest::simulate(&bars, &signals, &TradeConfig::default());
    assert_eq!(marked.trades.len(), 1);
    assert_eq!(marked.trades[0].exit_reason, ExitReason::EndOfData);
    assert_eq!(marked.open_at_end, 1);
    assert_relative_eq!(marked.trades[0].trade_return, 0.0);

    let excluded = backtest::simulate(
        &bars,
        &signals,
        &TradeConfig {
            open_trade_policy: OpenTradePolicy::Exclude,
            ..Default::default()
        },
    );
    assert!(excluded.trades.is_empty());
    assert_eq!(excluded.open_at_end, 1);
}

#[test]
fn test_trade_properties_hold() {
    let bars = BarSeries::new(sample_bars()).unwrap();
    let signals = breakout::detect(&bars, &Config::default().session);
    let config = TradeConfig::default();
    let result = backtest::simulate(&bars, &signals, &config);

    let mut equity = 1.0;
    for trade in &result.trades {
        assert!(trade.exit_time >= trade.entry_time);
        assert!(trade.trade_return <= config.take_profit_pct + 1e-12);
        assert!(trade.trade_return >= -config.stop_loss_pct - 1e-12);
        equity *= 1.0 + trade.trade_return;
        assert_relative_eq!(trade.cumulative_equity, equity, epsilon = 1e-12);
    }
    assert_eq!(risk::cumulative_equity(&result.returns()), result.equity_curve());
}

#[test]
fn test_sweep_over_detected_signals() {
    let bars = BarSeries::new(sample_bars()).unwrap();
    let config = Config::default();
    let signals = breakout::detect(&bars, &config.session);

    let configs = optimize::generate_configs(&config.sweep, &config.trade);
    let optimizer = Optimizer::new(&bars, &signals);
    let mut parallel = optimizer.optimize(&configs);
    let sequential = optimizer.optimize_sequential(&configs);
    assert_eq!(parallel, sequential);

    optimize::sort_results(&mut parallel, SortMetric::Return);
    assert!(parallel
        .windows(2)
        .all(|w| w[0].total_return >= w[1].total_return));
    assert!(parallel.iter().all(|r| r.total_trades == 2));
}

#[test]
fn test_report_and_export() {
    let bars = BarSeries::new(sample_bars()).unwrap();
    let detection = BreakoutDetector::default().detect(&bars);
    let result = TradeSimulator::default().run(&bars, &detection.signals);

    let text = report::render_summary(&result, &detection.stats);
    assert!(text.contains("Total Trades:       2"));
    assert!(text.contains("Win Rate:           50.00%"));

    let dir = std::env::temp_dir().join(format!("orb_results_{}", std::process::id()));
    let paths = report::export(&result, &detection, &dir).unwrap();
    let equity = std::fs::read_to_string(&paths.equity).unwrap();
    assert_eq!(equity.lines().count(), 3);
    let signals = std::fs::read_to_string(&paths.signals).unwrap();
    assert_eq!(signals.lines().count(), 3);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_bundled_config_loads() {
    let json = std::fs::read_to_string("configs/nq_5m.json").unwrap();
    let config = Config::from_json(&json).unwrap();
    assert_eq!(config.data.symbol, "NQ=F");
    assert_eq!(config.session.opening_range_minutes, 15);
    assert_eq!(config.sweep.take_profit_pcts.len(), 5);
}
