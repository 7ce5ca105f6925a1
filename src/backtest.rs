//! Trade simulation
//!
//! Each signal opens one trade at the close of its bar. The trade is walked
//! forward bar by bar (entry bar included) until the high/low range reaches the
//! take-profit or stop-loss level. Exit prices are the threshold levels
//! themselves; no fill sequence inside a bar is assumed. Trades compound
//! sequentially into the equity curve.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{IntrabarPriority, OpenTradePolicy, TradeConfig};
use crate::data::BarSeries;
use crate::risk;
use crate::{Bar, Direction, ExitReason, PerformanceSummary, RiskSummary, SignalEvent, TradeResult};

/// Where and why a trade closed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exit {
    pub price: f64,
    pub time: NaiveDateTime,
    pub reason: ExitReason,
}

/// Stop-loss / take-profit trade simulator
#[derive(Debug, Clone, Default)]
pub struct TradeSimulator {
    config: TradeConfig,
}

impl TradeSimulator {
    pub fn new(config: TradeConfig) -> Self {
        TradeSimulator { config }
    }

    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    /// Simulate every signal in order
    pub fn run(&self, bars: &BarSeries, signals: &[SignalEvent]) -> BacktestResult {
        let mut trades: Vec<TradeResult> = Vec::with_capacity(signals.len());
        let mut skipped_signals = 0;
        let mut open_at_end = 0;
        let mut equity = 1.0;

        for signal in signals {
            let Some(path) = bars.from_timestamp(signal.timestamp) else {
                debug!("No bar at {}, dropping signal", signal.timestamp);
                skipped_signals += 1;
                continue;
            };

            let entry = &path[0];
            let exit = match self.find_exit(signal.direction, entry.close, path) {
                Some(exit) => exit,
                None => {
                    open_at_end += 1;
                    match self.close_at_end(entry, path) {
                        Some(exit) => exit,
                        None => {
                            debug!("Trade from {} still open at end of data, excluded", entry.timestamp);
                            continue;
                        }
                    }
                }
            };

            let trade_return =
                signal.direction.sign() * (exit.price - entry.close) / entry.close;
            equity *= 1.0 + trade_return;

            debug!(
                "{} {} @ {:.2} -> {:.2} at {} ({:?}, {:+.4}%)",
                signal.direction,
                entry.timestamp,
                entry.close,
                exit.price,
                exit.time,
                exit.reason,
                trade_return * 100.0
            );

            trades.push(TradeResult {
                entry_time: entry.timestamp,
                exit_time: exit.time,
                direction: signal.direction,
                entry_price: entry.close,
                exit_price: exit.price,
                trade_return,
                cumulative_equity: equity,
                exit_reason: exit.reason,
            });
        }

        if skipped_signals > 0 {
            info!("Dropped {} signals with no matching bar", skipped_signals);
        }

        let result = BacktestResult::new(trades, skipped_signals, open_at_end);
        info!(
            "Simulated {} trades from {} signals, total return {:.2}%",
            result.summary.total_trades,
            signals.len(),
            result.summary.total_return * 100.0
        );
        result
    }

    /// First bar in `path` that reaches a threshold, if any
    pub fn find_exit(&self, direction: Direction, entry_price: f64, path: &[Bar]) -> Option<Exit> {
        let tp = self.config.take_profit_pct;
        let sl = self.config.stop_loss_pct;
        let sign = direction.sign();

        path.iter().find_map(|bar| {
            let (favorable, adverse) = match direction {
                Direction::Long => (
                    (bar.high - entry_price) / entry_price,
                    (entry_price - bar.low) / entry_price,
                ),
                Direction::Short => (
                    (entry_price - bar.low) / entry_price,
                    (bar.high - entry_price) / entry_price,
                ),
            };

            let take_profit = Exit {
                price: entry_price * (1.0 + tp * sign),
                time: bar.timestamp,
                reason: ExitReason::TakeProfit,
            };
            let stop_loss = Exit {
                price: entry_price * (1.0 - sl * sign),
                time: bar.timestamp,
                reason: ExitReason::StopLoss,
            };

            match (favorable >= tp, adverse >= sl) {
                (true, true) => Some(match self.config.intrabar_priority {
                    IntrabarPriority::TakeProfitFirst => take_profit,
                    IntrabarPriority::StopLossFirst => stop_loss,
                }),
                (true, false) => Some(take_profit),
                (false, true) => Some(stop_loss),
                (false, false) => None,
            }
        })
    }

    /// Exit for a trade that never reached a threshold
    fn close_at_end(&self, entry: &Bar, path: &[Bar]) -> Option<Exit> {
        let last = path.last().unwrap_or(entry);
        match self.config.open_trade_policy {
            OpenTradePolicy::MarkToLast => Some(Exit {
                price: last.close,
                time: last.timestamp,
                reason: ExitReason::EndOfData,
            }),
            OpenTradePolicy::Flat => Some(Exit {
                price: entry.close,
                time: last.timestamp,
                reason: ExitReason::EndOfData,
            }),
            OpenTradePolicy::Exclude => None,
        }
    }
}

/// Simulate `signals` against `bars` with the given exit rules
pub fn simulate(bars: &BarSeries, signals: &[SignalEvent], config: &TradeConfig) -> BacktestResult {
    TradeSimulator::new(config.clone()).run(bars, signals)
}

/// Trades in signal order with derived statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BacktestResult {
    pub trades: Vec<TradeResult>,
    pub risk: RiskSummary,
    pub summary: PerformanceSummary,
    /// Signals whose timestamp had no bar
    pub skipped_signals: usize,
    /// Trades that reached the end of data without hitting a threshold
    pub open_at_end: usize,
}

impl BacktestResult {
    pub fn new(trades: Vec<TradeResult>, skipped_signals: usize, open_at_end: usize) -> Self {
        let returns: Vec<f64> = trades.iter().map(|t| t.trade_return).collect();
        BacktestResult {
            risk: risk::risk_summary(&returns),
            summary: risk::performance_summary(&trades),
            trades,
            skipped_signals,
            open_at_end,
        }
    }

    pub fn returns(&self) -> Vec<f64> {
        self.trades.iter().map(|t| t.trade_return).collect()
    }

    /// Cumulative equity indexed by trade number
    pub fn equity_curve(&self) -> Vec<f64> {
        self.trades.iter().map(|t| t.cumulative_equity).collect()
    }
}
