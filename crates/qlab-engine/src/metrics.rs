use qlab_core::{EquityPoint, Metric, Trade};
use serde::{Deserialize, Serialize};

/// Minutes per year: equity returns are assumed to be 1-minute bars.
const PERIODS_PER_YEAR: f64 = 525_600.0;
const RISK_FREE_RATE: f64 = 0.02;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Computed performance metrics for one backtest run.
///
/// Percentages are expressed in percent (`12.5` means 12.5%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub total_return_pct: f64,
    pub cagr: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub expectancy: f64,
    pub total_commission: f64,
    pub average_trade_duration_ms: f64,
}

impl PerformanceMetrics {
    /// Value of the field an optimizer ranks by.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::TotalReturn => self.total_return,
            Metric::TotalReturnPct => self.total_return_pct,
            Metric::Cagr => self.cagr,
            Metric::WinRate => self.win_rate,
            Metric::ProfitFactor => self.profit_factor,
            Metric::SharpeRatio => self.sharpe_ratio,
            Metric::SortinoRatio => self.sortino_ratio,
            Metric::CalmarRatio => self.calmar_ratio,
            Metric::MaxDrawdown => self.max_drawdown,
            Metric::MaxDrawdownPct => self.max_drawdown_pct,
            Metric::Expectancy => self.expectancy,
            Metric::TotalTrades => self.total_trades as f64,
            Metric::AverageWin => self.average_win,
            Metric::AverageLoss => self.average_loss,
        }
    }
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all performance metrics from the trade list and equity curve.
    pub fn calculate(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        start_ts: i64,
        end_ts: i64,
    ) -> PerformanceMetrics {
        if trades.is_empty() {
            return PerformanceMetrics::default();
        }

        let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
        let final_equity = equity.last().copied().unwrap_or(initial_capital);
        let total_return = final_equity - initial_capital;
        let total_return_pct = if initial_capital != 0.0 {
            total_return / initial_capital * 100.0
        } else {
            0.0
        };
        let cagr = Self::cagr(initial_capital, final_equity, start_ts, end_ts);
        let (max_drawdown, max_drawdown_pct) = Self::max_drawdown(&equity, initial_capital);
        let returns = Self::compute_returns(&equity);

        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|&p| p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|&p| p < 0.0).collect();
        let (max_consecutive_wins, max_consecutive_losses) = Self::streaks(&pnls);
        let n = trades.len() as f64;

        PerformanceMetrics {
            total_return,
            total_return_pct,
            cagr,
            total_trades: trades.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / n * 100.0,
            profit_factor: Self::profit_factor(&pnls),
            average_win: mean(&wins),
            average_loss: mean(&losses),
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            max_consecutive_wins,
            max_consecutive_losses,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: Self::sharpe_ratio(&returns, cagr),
            sortino_ratio: Self::sortino_ratio(&returns, cagr),
            calmar_ratio: if max_drawdown_pct > 0.0 {
                cagr / max_drawdown_pct
            } else {
                0.0
            },
            expectancy: pnls.iter().sum::<f64>() / n,
            total_commission: trades.iter().map(|t| t.commission).sum(),
            average_trade_duration_ms: trades.iter().map(|t| t.duration_ms() as f64).sum::<f64>()
                / n,
        }
    }

    fn compute_returns(equity: &[f64]) -> Vec<f64> {
        if equity.len() < 2 {
            return Vec::new();
        }
        equity
            .windows(2)
            .map(|w| {
                if w[0] == 0.0 {
                    0.0
                } else {
                    (w[1] - w[0]) / w[0]
                }
            })
            .collect()
    }

    fn cagr(initial: f64, final_equity: f64, start_ts: i64, end_ts: i64) -> f64 {
        let years = (end_ts - start_ts) as f64 / MS_PER_DAY / 365.0;
        if years <= 0.0 || final_equity <= 0.0 || initial <= 0.0 {
            return 0.0;
        }
        ((final_equity / initial).powf(1.0 / years) - 1.0) * 100.0
    }

    fn sharpe_ratio(returns: &[f64], cagr: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let std = std_dev(returns);
        if std == 0.0 {
            return 0.0;
        }
        (cagr / 100.0 - RISK_FREE_RATE) / (std * PERIODS_PER_YEAR.sqrt())
    }

    fn sortino_ratio(returns: &[f64], cagr: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        if downside.is_empty() {
            return 0.0;
        }
        let downside_std = std_dev(&downside);
        if downside_std == 0.0 {
            return 0.0;
        }
        (cagr / 100.0 - RISK_FREE_RATE) / (downside_std * PERIODS_PER_YEAR.sqrt())
    }

    /// Largest peak-to-trough decline as `(amount, percent of peak)`.
    /// The running peak starts at the initial capital.
    fn max_drawdown(equity: &[f64], initial_capital: f64) -> (f64, f64) {
        let mut peak = initial_capital;
        let mut max_dd = 0.0f64;
        let mut max_dd_pct = 0.0f64;
        for &value in equity {
            if value > peak {
                peak = value;
            }
            let dd = peak - value;
            if dd > max_dd {
                max_dd = dd;
            }
            if peak > 0.0 {
                max_dd_pct = max_dd_pct.max(dd / peak * 100.0);
            }
        }
        (max_dd, max_dd_pct)
    }

    fn profit_factor(pnls: &[f64]) -> f64 {
        let gross_profit: f64 = pnls.iter().filter(|&&p| p > 0.0).sum();
        let gross_loss: f64 = pnls.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();
        if gross_loss == 0.0 {
            return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
        }
        gross_profit / gross_loss
    }

    /// Longest runs of winning and losing trades. A break-even trade ends both.
    fn streaks(pnls: &[f64]) -> (usize, usize) {
        let (mut wins, mut losses) = (0usize, 0usize);
        let (mut max_wins, mut max_losses) = (0usize, 0usize);
        for &pnl in pnls {
            if pnl > 0.0 {
                wins += 1;
                losses = 0;
            } else if pnl < 0.0 {
                losses += 1;
                wins = 0;
            } else {
                wins = 0;
                losses = 0;
            }
            max_wins = max_wins.max(wins);
            max_losses = max_losses.max(losses);
        }
        (max_wins, max_losses)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlab_core::{Direction, ExitReason};

    const DAY: i64 = 86_400_000;

    fn make_trades(pnls: &[f64]) -> Vec<Trade> {
        pnls.iter()
            .enumerate()
            .map(|(i, &pnl)| Trade {
                id: i as u64 + 1,
                direction: Direction::Long,
                entry_time: i as i64 * DAY,
                entry_price: 100.0,
                exit_time: i as i64 * DAY + 60_000,
                exit_price: 100.0 + pnl / 10.0,
                size: 1_000.0,
                pnl,
                pnl_percent: pnl / 10.0,
                commission: 1.0,
                exit_reason: ExitReason::Signal,
            })
            .collect()
    }

    fn equity_from(initial: f64, pnls: &[f64]) -> Vec<EquityPoint> {
        pnls.iter()
            .scan(initial, |acc, &pnl| {
                *acc += pnl;
                Some(*acc)
            })
            .enumerate()
            .map(|(i, equity)| EquityPoint {
                timestamp: i as i64 * DAY,
                equity,
            })
            .collect()
    }

    #[test]
    fn test_no_trades_is_all_zero() {
        let equity = equity_from(1_000.0, &[0.0, 0.0]);
        let m = MetricsCalculator::calculate(&[], &equity, 1_000.0, 0, 10 * DAY);
        assert_eq!(m, PerformanceMetrics::default());
    }

    #[test]
    fn test_profit_factor() {
        let pf = MetricsCalculator::profit_factor(&[10.0, -5.0, 20.0, -3.0]);
        assert!((pf - 30.0 / 8.0).abs() < 1e-10);
        assert_eq!(MetricsCalculator::profit_factor(&[10.0, 5.0]), f64::INFINITY);
        assert_eq!(MetricsCalculator::profit_factor(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let equity = vec![100.0, 110.0, 105.0, 115.0, 100.0];
        let (dd, dd_pct) = MetricsCalculator::max_drawdown(&equity, 100.0);
        // Peak 115, trough 100
        assert!((dd - 15.0).abs() < 1e-10);
        assert!((dd_pct - 15.0 / 115.0 * 100.0).abs() < 1e-10);
    }

    #[test]
    fn test_drawdown_measured_from_initial_capital() {
        let (dd, dd_pct) = MetricsCalculator::max_drawdown(&[90.0, 95.0], 100.0);
        assert!((dd - 10.0).abs() < 1e-10);
        assert!((dd_pct - 10.0).abs() < 1e-10);
    }

    #[test]
    fn test_sharpe_zero_std() {
        let returns = vec![0.01, 0.01, 0.01];
        assert_eq!(MetricsCalculator::sharpe_ratio(&returns, 10.0), 0.0);
        assert_eq!(MetricsCalculator::sortino_ratio(&returns, 10.0), 0.0);
    }

    #[test]
    fn test_streaks_reset_on_break_even() {
        let (w, l) = MetricsCalculator::streaks(&[1.0, 2.0, 0.0, 3.0, -1.0, -1.0, -1.0, 4.0]);
        assert_eq!(w, 2);
        assert_eq!(l, 3);
    }

    #[test]
    fn test_metrics_full() {
        let pnls = [10.0, -5.0, 20.0, -3.0, 15.0];
        let trades = make_trades(&pnls);
        let equity = equity_from(1_000.0, &pnls);

        let m = MetricsCalculator::calculate(&trades, &equity, 1_000.0, 0, 365 * DAY);
        assert_eq!(m.total_trades, 5);
        assert_eq!(m.winning_trades, 3);
        assert_eq!(m.losing_trades, 2);
        assert!((m.win_rate - 60.0).abs() < 1e-10);
        assert!((m.total_return - 37.0).abs() < 1e-10);
        assert!((m.total_return_pct - 3.7).abs() < 1e-10);
        // One year elapsed: CAGR equals the total return.
        assert!((m.cagr - 3.7).abs() < 1e-9);
        assert!((m.average_win - 15.0).abs() < 1e-10);
        assert!((m.average_loss + 4.0).abs() < 1e-10);
        assert_eq!(m.largest_win, 20.0);
        assert_eq!(m.largest_loss, -5.0);
        assert!((m.expectancy - 7.4).abs() < 1e-10);
        assert!((m.total_commission - 5.0).abs() < 1e-10);
        assert!((m.average_trade_duration_ms - 60_000.0).abs() < 1e-10);
        assert!(m.max_drawdown_pct >= 0.0 && m.max_drawdown_pct <= 100.0);
        assert!(m.calmar_ratio > 0.0);
        assert_eq!(m.value(Metric::TotalTrades), 5.0);
        assert_eq!(m.value(Metric::WinRate), m.win_rate);
    }

    #[test]
    fn test_cagr_guards() {
        assert_eq!(MetricsCalculator::cagr(1_000.0, 1_100.0, 0, 0), 0.0);
        assert_eq!(MetricsCalculator::cagr(1_000.0, -5.0, 0, 365 * DAY), 0.0);
    }
}
