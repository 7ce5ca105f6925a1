//! Parameter sweep
//!
//! Grid search over stop-loss × take-profit with parallel execution using Rayon.
//! Signals don't depend on exit thresholds, so detection runs once and every
//! grid point re-simulates the same signal list.

use indicatif::ProgressBar;
use itertools::iproduct;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

use crate::backtest::TradeSimulator;
use crate::config::{SweepConfig, TradeConfig};
use crate::data::BarSeries;
use crate::SignalEvent;

/// Outcome of one stop/target combination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub total_trades: usize,
    pub total_return: f64,
    pub win_rate: f64,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: Option<f64>,
}

/// Metric used to rank sweep results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMetric {
    #[default]
    Sharpe,
    Return,
    WinRate,
    Drawdown,
}

impl std::str::FromStr for SortMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sharpe" => Ok(SortMetric::Sharpe),
            "return" => Ok(SortMetric::Return),
            "win_rate" | "winrate" => Ok(SortMetric::WinRate),
            "drawdown" | "max_drawdown" => Ok(SortMetric::Drawdown),
            _ => Err(format!(
                "Unknown sort metric: {}. Use sharpe, return, win_rate or drawdown",
                s
            )),
        }
    }
}

impl std::fmt::Display for SortMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortMetric::Sharpe => write!(f, "sharpe"),
            SortMetric::Return => write!(f, "return"),
            SortMetric::WinRate => write!(f, "win_rate"),
            SortMetric::Drawdown => write!(f, "drawdown"),
        }
    }
}

/// Every stop/target pair of the grid, other exit rules taken from `base`
pub fn generate_configs(grid: &SweepConfig, base: &TradeConfig) -> Vec<TradeConfig> {
    iproduct!(grid.stop_loss_pcts.iter(), grid.take_profit_pcts.iter())
        .map(|(&stop_loss_pct, &take_profit_pct)| TradeConfig {
            stop_loss_pct,
            take_profit_pct,
            ..base.clone()
        })
        .collect()
}

/// Re-simulates a fixed signal list under many exit configurations
pub struct Optimizer<'a> {
    bars: &'a BarSeries,
    signals: &'a [SignalEvent],
}

impl<'a> Optimizer<'a> {
    pub fn new(bars: &'a BarSeries, signals: &'a [SignalEvent]) -> Self {
        Optimizer { bars, signals }
    }

    fn evaluate(&self, config: &TradeConfig) -> SweepResult {
        let result = TradeSimulator::new(config.clone()).run(self.bars, self.signals);
        SweepResult {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            total_trades: result.summary.total_trades,
            total_return: result.summary.total_return,
            win_rate: result.summary.win_rate,
            sharpe_ratio: result.risk.sharpe_ratio,
            max_drawdown: result.risk.max_drawdown,
        }
    }

    /// Run all configurations in parallel
    pub fn optimize(&self, configs: &[TradeConfig]) -> Vec<SweepResult> {
        tracing::info!("Testing {} parameter combinations", configs.len());
        configs.par_iter().map(|c| self.evaluate(c)).collect()
    }

    /// Run in parallel, advancing `progress_bar` after each configuration
    pub fn optimize_with_progress(
        &self,
        configs: &[TradeConfig],
        progress_bar: &ProgressBar,
    ) -> Vec<SweepResult> {
        tracing::info!(
            "Testing {} parameter combinations with progress tracking",
            configs.len()
        );
        configs
            .par_iter()
            .map(|c| {
                let result = self.evaluate(c);
                progress_bar.inc(1);
                result
            })
            .collect()
    }

    /// Run sequentially (no parallelism)
    pub fn optimize_sequential(&self, configs: &[TradeConfig]) -> Vec<SweepResult> {
        tracing::info!(
            "Testing {} parameter combinations sequentially",
            configs.len()
        );
        configs.iter().map(|c| self.evaluate(c)).collect()
    }
}

/// Missing values rank last
fn cmp_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Best first; for drawdown, smallest first
pub fn sort_results(results: &mut [SweepResult], metric: SortMetric) {
    results.sort_by(|a, b| match metric {
        SortMetric::Sharpe => cmp_desc(a.sharpe_ratio, b.sharpe_ratio),
        SortMetric::Return => cmp_desc(Some(a.total_return), Some(b.total_return)),
        SortMetric::WinRate => cmp_desc(Some(a.win_rate), Some(b.win_rate)),
        SortMetric::Drawdown => cmp_desc(a.max_drawdown.map(|d| -d), b.max_drawdown.map(|d| -d)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(sl: f64, sharpe: Option<f64>, ret: f64, dd: Option<f64>) -> SweepResult {
        SweepResult {
            stop_loss_pct: sl,
            take_profit_pct: 0.006,
            total_trades: 10,
            total_return: ret,
            win_rate: 0.5,
            sharpe_ratio: sharpe,
            max_drawdown: dd,
        }
    }

    #[test]
    fn test_generate_configs_covers_grid() {
        let grid = SweepConfig {
            stop_loss_pcts: vec![0.002, 0.003],
            take_profit_pcts: vec![0.004, 0.006, 0.008],
        };
        let configs = generate_configs(&grid, &TradeConfig::default());
        assert_eq!(configs.len(), 6);
        assert_eq!(configs[0].stop_loss_pct, 0.002);
        assert_eq!(configs[0].take_profit_pct, 0.004);
        assert_eq!(configs[5].stop_loss_pct, 0.003);
        assert_eq!(configs[5].take_profit_pct, 0.008);
    }

    #[test]
    fn test_sort_by_sharpe_puts_none_last() {
        let mut results = vec![
            result(0.001, None, 0.0, None),
            result(0.002, Some(0.5), 0.0, None),
            result(0.003, Some(1.5), 0.0, None),
        ];
        sort_results(&mut results, SortMetric::Sharpe);
        assert_eq!(results[0].stop_loss_pct, 0.003);
        assert_eq!(results[1].stop_loss_pct, 0.002);
        assert_eq!(results[2].stop_loss_pct, 0.001);
    }

    #[test]
    fn test_sort_by_drawdown_smallest_first() {
        let mut results = vec![
            result(0.001, None, 0.0, Some(0.05)),
            result(0.002, None, 0.0, Some(0.01)),
            result(0.003, None, 0.0, None),
        ];
        sort_results(&mut results, SortMetric::Drawdown);
        assert_eq!(results[0].stop_loss_pct, 0.002);
        assert_eq!(results[2].stop_loss_pct, 0.003);
    }

    #[test]
    fn test_sort_metric_parse() {
        assert_eq!("sharpe".parse::<SortMetric>(), Ok(SortMetric::Sharpe));
        assert_eq!("WIN_RATE".parse::<SortMetric>(), Ok(SortMetric::WinRate));
        assert!("alpha".parse::<SortMetric>().is_err());
    }

    #[test]
    fn test_optimize_on_empty_signals() {
        let bars = BarSeries::default();
        let configs = generate_configs(&SweepConfig::default(), &TradeConfig::default());
        let results = Optimizer::new(&bars, &[]).optimize(&configs);
        assert_eq!(results.len(), configs.len());
        assert!(results.iter().all(|r| r.total_trades == 0 && r.sharpe_ratio.is_none()));
    }
}
