//! Return-series statistics
//!
//! Everything here is derived from the ordered per-trade returns:
//! - cumulative equity: running product of `(1 + r)`, starting from 1.0
//! - Sharpe ratio: `mean / sample_stdev * sqrt(252)`
//! - max drawdown: largest drop of equity below its running peak, in equity units
//!
//! The 252 factor annualizes as if one trade were one trading day. It is a coarse
//! convention kept for comparability, not a per-trade annualization.

use statrs::statistics::Statistics;

use crate::{PerformanceSummary, RiskSummary, TradeResult};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Standard deviations below this are treated as zero variance.
/// Returns computed from the same threshold at different entry prices differ only by rounding.
const MIN_STD_DEV: f64 = 1e-12;

/// Running product of `(1 + r)`
pub fn cumulative_equity(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |equity, r| {
            *equity *= 1.0 + r;
            Some(*equity)
        })
        .collect()
}

/// Annualized Sharpe ratio; `None` with fewer than two returns or zero variance
pub fn sharpe_ratio(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();

    if !std_dev.is_finite() || std_dev < MIN_STD_DEV {
        return None;
    }

    Some(mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt())
}

/// `max(running_max(equity) - equity)`; `None` for an empty curve
pub fn max_drawdown(equity: &[f64]) -> Option<f64> {
    let first = *equity.first()?;

    let (_, max_dd) = equity.iter().fold((first, 0.0_f64), |(peak, max_dd), &e| {
        let peak = peak.max(e);
        (peak, max_dd.max(peak - e))
    });

    Some(max_dd)
}

pub fn risk_summary(returns: &[f64]) -> RiskSummary {
    RiskSummary {
        sharpe_ratio: sharpe_ratio(returns),
        max_drawdown: max_drawdown(&cumulative_equity(returns)),
    }
}

/// Trade count, win rate, average and total return
pub fn performance_summary(trades: &[TradeResult]) -> PerformanceSummary {
    if trades.is_empty() {
        return PerformanceSummary::default();
    }

    let total_trades = trades.len();
    let winning_trades = trades.iter().filter(|t| t.is_win()).count();
    let total_return = trades
        .last()
        .map(|t| t.cumulative_equity - 1.0)
        .unwrap_or_default();

    PerformanceSummary {
        total_trades,
        winning_trades,
        losing_trades: total_trades - winning_trades,
        total_return,
        win_rate: winning_trades as f64 / total_trades as f64,
        avg_trade_return: trades.iter().map(|t| t.trade_return).mean(),
    }
}
