//! Result reporting
//!
//! Console summary and file exports. The equity curve is written indexed by
//! trade number so any plotting tool can consume it directly.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backtest::BacktestResult;
use crate::breakout::{Detection, DetectionStats};
use crate::{PerformanceSummary, RiskSummary};

fn fmt_pct(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}%", v * 100.0))
}

fn fmt_ratio(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v))
}

/// Render the headline KPIs
pub fn render_summary(result: &BacktestResult, stats: &DetectionStats) -> String {
    let s = &result.summary;
    let line = "=".repeat(60);
    let mut out = String::new();

    out.push_str(&format!("\n{}\n", line));
    out.push_str("ORB BACKTEST RESULTS\n");
    out.push_str(&format!("{}\n", line));
    out.push_str(&format!("Sessions Scanned:   {}\n", stats.sessions));
    out.push_str(&format!("Signals:            {}\n", stats.signals));
    out.push_str(&format!("Total Trades:       {}\n", s.total_trades));
    out.push_str(&format!("Total Return:       {:.2}%\n", s.total_return * 100.0));
    out.push_str(&format!("Win Rate:           {:.2}%\n", s.win_rate * 100.0));
    out.push_str(&format!("Avg Trade Return:   {:.2}%\n", s.avg_trade_return * 100.0));
    out.push_str(&format!("Sharpe Ratio:       {}\n", fmt_ratio(result.risk.sharpe_ratio)));
    out.push_str(&format!("Max Drawdown:       {}\n", fmt_pct(result.risk.max_drawdown)));
    out.push_str(&format!("Winning Trades:     {}\n", s.winning_trades));
    out.push_str(&format!("Losing Trades:      {}\n", s.losing_trades));
    if result.skipped_signals > 0 {
        out.push_str(&format!("Dropped Signals:    {}\n", result.skipped_signals));
    }
    if result.open_at_end > 0 {
        out.push_str(&format!("Open At End:        {}\n", result.open_at_end));
    }
    out.push_str(&line);
    out
}

#[derive(Serialize)]
struct EquityRow {
    trade: usize,
    cumulative: f64,
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    risk: &'a RiskSummary,
    summary: &'a PerformanceSummary,
    detection: &'a DetectionStats,
    skipped_signals: usize,
    open_at_end: usize,
}

/// Files written by [`export`]
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub trades: PathBuf,
    pub signals: PathBuf,
    pub equity: PathBuf,
    pub summary: PathBuf,
}

fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .context(format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write trades, signals, equity curve and summary into `dir`
pub fn export(result: &BacktestResult, detection: &Detection, dir: impl AsRef<Path>) -> Result<ExportPaths> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).context("Failed to create results directory")?;

    let paths = ExportPaths {
        trades: dir.join("trades.csv"),
        signals: dir.join("signals.csv"),
        equity: dir.join("equity.csv"),
        summary: dir.join("summary.json"),
    };

    write_csv(&paths.trades, &result.trades)?;
    write_csv(&paths.signals, &detection.signals)?;
    write_csv(
        &paths.equity,
        result
            .equity_curve()
            .into_iter()
            .enumerate()
            .map(|(i, cumulative)| EquityRow {
                trade: i + 1,
                cumulative,
            }),
    )?;

    let summary = SummaryFile {
        risk: &result.risk,
        summary: &result.summary,
        detection: &detection.stats,
        skipped_signals: result.skipped_signals,
        open_at_end: result.open_at_end,
    };
    std::fs::write(&paths.summary, serde_json::to_string_pretty(&summary)?)
        .context("Failed to write summary")?;

    info!("Exported results to {}", dir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, ExitReason, SignalEvent, TradeResult};
    use chrono::NaiveDate;

    fn sample() -> (BacktestResult, Detection) {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 50, 0)
            .unwrap();
        let trades = vec![TradeResult {
            entry_time: ts,
            exit_time: ts,
            direction: Direction::Long,
            entry_price: 100.0,
            exit_price: 100.6,
            trade_return: 0.006,
            cumulative_equity: 1.006,
            exit_reason: ExitReason::TakeProfit,
        }];
        let detection = Detection {
            signals: vec![SignalEvent {
                timestamp: ts,
                direction: Direction::Long,
                range_high: 102.0,
                range_low: 98.0,
            }],
            stats: DetectionStats {
                sessions: 1,
                signals: 1,
                ..Default::default()
            },
        };
        (BacktestResult::new(trades, 0, 0), detection)
    }

    #[test]
    fn test_summary_marks_missing_stats() {
        let (result, detection) = sample();
        let text = render_summary(&result, &detection.stats);
        assert!(text.contains("Total Trades:       1"));
        assert!(text.contains("Sharpe Ratio:       N/A"));
        assert!(text.contains("Max Drawdown:       0.00%"));
    }

    #[test]
    fn test_export_writes_files() {
        let (result, detection) = sample();
        let dir = std::env::temp_dir().join(format!("orb_backtest_export_{}", std::process::id()));
        let paths = export(&result, &detection, &dir).unwrap();

        let equity = std::fs::read_to_string(&paths.equity).unwrap();
        assert_eq!(equity.lines().next(), Some("trade,cumulative"));
        assert_eq!(equity.lines().nth(1), Some("1,1.006"));

        let trades = std::fs::read_to_string(&paths.trades).unwrap();
        assert!(trades.lines().next().unwrap().contains("return"));
        assert!(trades.contains("TakeProfit"));

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.summary).unwrap()).unwrap();
        assert_eq!(summary["summary"]["total_trades"], 1);
        assert!(summary["risk"]["sharpe_ratio"].is_null());

        std::fs::remove_dir_all(&dir).ok();
    }
}
