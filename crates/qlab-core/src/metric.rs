use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `PerformanceMetrics` field an optimizer can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalReturn,
    TotalReturnPct,
    Cagr,
    WinRate,
    ProfitFactor,
    #[default]
    SharpeRatio,
    SortinoRatio,
    CalmarRatio,
    MaxDrawdown,
    MaxDrawdownPct,
    Expectancy,
    TotalTrades,
    AverageWin,
    AverageLoss,
}

impl Metric {
    pub const ALL: [Metric; 14] = [
        Metric::TotalReturn,
        Metric::TotalReturnPct,
        Metric::Cagr,
        Metric::WinRate,
        Metric::ProfitFactor,
        Metric::SharpeRatio,
        Metric::SortinoRatio,
        Metric::CalmarRatio,
        Metric::MaxDrawdown,
        Metric::MaxDrawdownPct,
        Metric::Expectancy,
        Metric::TotalTrades,
        Metric::AverageWin,
        Metric::AverageLoss,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::TotalReturn => "total_return",
            Metric::TotalReturnPct => "total_return_pct",
            Metric::Cagr => "cagr",
            Metric::WinRate => "win_rate",
            Metric::ProfitFactor => "profit_factor",
            Metric::SharpeRatio => "sharpe_ratio",
            Metric::SortinoRatio => "sortino_ratio",
            Metric::CalmarRatio => "calmar_ratio",
            Metric::MaxDrawdown => "max_drawdown",
            Metric::MaxDrawdownPct => "max_drawdown_pct",
            Metric::Expectancy => "expectancy",
            Metric::TotalTrades => "total_trades",
            Metric::AverageWin => "average_win",
            Metric::AverageLoss => "average_loss",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown metric: {}", s))
    }
}
