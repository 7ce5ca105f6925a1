//! Sweep command implementation
//!
//! Detection runs once; the grid re-simulates the same signals.

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use orb_backtest::breakout::BreakoutDetector;
use orb_backtest::optimize::{self, Optimizer, SortMetric};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::RunArgs;

/// Parse comma-separated percentages into fractions
fn parse_percent_list(value: &str) -> Result<Vec<f64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map(|pct| pct / 100.0)
                .context(format!("Invalid percentage: {}", s))
        })
        .collect()
}

fn fmt_opt(value: Option<f64>, scale: f64) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v * scale))
}

pub fn run(
    args: RunArgs,
    stop_loss: Option<String>,
    take_profit: Option<String>,
    sort_by: String,
    top: usize,
    sequential: bool,
) -> Result<()> {
    let sort_metric = sort_by.parse::<SortMetric>().map_err(|e| anyhow!(e))?;

    let mut config = super::load_config(&args)?;
    if let Some(list) = stop_loss {
        config.sweep.stop_loss_pcts = parse_percent_list(&list)?;
    }
    if let Some(list) = take_profit {
        config.sweep.take_profit_pcts = parse_percent_list(&list)?;
    }

    let configs = optimize::generate_configs(&config.sweep, &config.trade);
    anyhow::ensure!(!configs.is_empty(), "Sweep grid is empty");
    for trade in &configs {
        trade.validate()?;
    }

    println!("Loading data...");
    let bars = super::load_bars(&config)?;

    let detection = BreakoutDetector::new(config.session.clone()).detect(&bars);
    if detection.signals.is_empty() {
        println!("No signals generated. Check the session times and the data window.");
        return Ok(());
    }
    println!(
        "{} signals over {} sessions, testing {} combinations",
        detection.signals.len(),
        detection.stats.sessions,
        configs.len()
    );

    let optimizer = Optimizer::new(&bars, &detection.signals);
    let mut results = if sequential {
        optimizer.optimize_sequential(&configs)
    } else {
        let pb = ProgressBar::new(configs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
                .progress_chars("█░ "),
        );
        let results = optimizer.optimize_with_progress(&configs, &pb);
        pb.finish_and_clear();
        results
    };

    optimize::sort_results(&mut results, sort_metric);
    info!("Sweep finished, {} results sorted by {}", results.len(), sort_metric);

    println!("\n{}", "=".repeat(78));
    println!(
        "TOP {} BY {}",
        top.min(results.len()),
        sort_metric.to_string().to_uppercase()
    );
    println!("{}", "=".repeat(78));
    println!(
        "{:>4} {:>8} {:>8} {:>7} {:>10} {:>9} {:>8} {:>8}",
        "#", "SL%", "TP%", "Trades", "Return%", "WinRate%", "Sharpe", "MaxDD%"
    );
    println!("{}", "-".repeat(78));
    for (i, r) in results.iter().take(top).enumerate() {
        println!(
            "{:>4} {:>8.2} {:>8.2} {:>7} {:>10.2} {:>9.2} {:>8} {:>8}",
            i + 1,
            r.stop_loss_pct * 100.0,
            r.take_profit_pct * 100.0,
            r.total_trades,
            r.total_return * 100.0,
            r.win_rate * 100.0,
            fmt_opt(r.sharpe_ratio, 1.0),
            fmt_opt(r.max_drawdown, 100.0),
        );
    }
    println!("{}", "=".repeat(78));

    let dir = Path::new(&config.data.results_dir);
    fs::create_dir_all(dir).context("Failed to create results directory")?;
    let out = dir.join("sweep_results.json");
    fs::write(&out, serde_json::to_string_pretty(&results)?)
        .context("Failed to write sweep results")?;
    println!("\nResults saved to: {}", out.display());

    Ok(())
}
