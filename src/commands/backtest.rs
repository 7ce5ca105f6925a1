//! Backtest command implementation

use anyhow::{anyhow, Result};
use orb_backtest::backtest::TradeSimulator;
use orb_backtest::breakout::BreakoutDetector;
use orb_backtest::config::{IntrabarPriority, OpenTradePolicy};
use orb_backtest::report;
use tracing::{info, warn};

use crate::RunArgs;

/// Exit-rule overrides from the command line; thresholds are in percent
#[derive(Debug, Default)]
pub struct TradeOverrides {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub intrabar: Option<String>,
    pub open_trades: Option<String>,
}

pub fn run(
    args: RunArgs,
    overrides: TradeOverrides,
    export: bool,
    output: Option<String>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = super::load_config(&args)?;

    if let Some(sl) = overrides.stop_loss {
        info!("Overriding stop-loss to: {}%", sl);
        config.trade.stop_loss_pct = sl / 100.0;
    }
    if let Some(tp) = overrides.take_profit {
        info!("Overriding take-profit to: {}%", tp);
        config.trade.take_profit_pct = tp / 100.0;
    }
    if let Some(priority) = overrides.intrabar {
        config.trade.intrabar_priority = priority
            .parse::<IntrabarPriority>()
            .map_err(|e| anyhow!(e))?;
    }
    if let Some(policy) = overrides.open_trades {
        config.trade.open_trade_policy = policy
            .parse::<OpenTradePolicy>()
            .map_err(|e| anyhow!(e))?;
    }
    if let Some(dir) = output {
        config.data.results_dir = dir;
    }
    config.validate()?;

    info!(
        "Session {}-{}, opening range {} min, SL {:.2}%, TP {:.2}%",
        config.session.open_time.format("%H:%M"),
        config.session.close_time.format("%H:%M"),
        config.session.opening_range_minutes,
        config.trade.stop_loss_pct * 100.0,
        config.trade.take_profit_pct * 100.0
    );

    let bars = super::load_bars(&config)?;

    let detection = BreakoutDetector::new(config.session.clone()).detect(&bars);
    if detection.signals.is_empty() {
        warn!("No signals generated");
        println!("No signals generated. Check the session times and the data window.");
        return Ok(());
    }

    let result = TradeSimulator::new(config.trade.clone()).run(&bars, &detection.signals);

    println!("{}", report::render_summary(&result, &detection.stats));

    if export {
        let paths = report::export(&result, &detection, &config.data.results_dir)?;
        println!("\nTrades:  {}", paths.trades.display());
        println!("Signals: {}", paths.signals.display());
        println!("Equity:  {}", paths.equity.display());
        println!("Summary: {}", paths.summary.display());
    }

    Ok(())
}
