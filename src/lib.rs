//! Opening Range Breakout Backtester
//!
//! Detects the first breakout of each session's opening range in intraday bars
//! and simulates trading it under fixed stop-loss / take-profit thresholds,
//! producing per-trade returns, an equity curve and risk statistics.
//!
//! ```no_run
//! use orb_backtest::{backtest, breakout, data, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let bars = data::load_csv("data/NQ_5m.csv")?;
//!     let signals = breakout::detect(&bars, &config.session);
//!     let result = backtest::simulate(&bars, &signals, &config.trade);
//!     println!("{} trades, Sharpe {:?}", result.trades.len(), result.risk.sharpe_ratio);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod breakout;
pub mod config;
pub mod data;
pub mod optimize;
pub mod report;
pub mod risk;
pub mod session;
pub mod types;

pub use config::Config;
pub use types::*;
