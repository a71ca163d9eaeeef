use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use qlab_core::{MonteCarloConfig, Trade};
use qlab_engine::metrics::std_dev;

use crate::control::{CancelToken, Progress};
use crate::error::OptimizeError;

const MAX_SIMULATIONS: usize = 10_000;
const PROGRESS_EVERY: usize = 100;

/// Outcome of replaying one ordering of the trade P&L sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationStats {
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub final_equity: f64,
    pub sharpe: f64,
    pub ruined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl Percentiles {
    fn from_sorted(sorted: &[f64]) -> Self {
        Self {
            p5: percentile(sorted, 5.0),
            p25: percentile(sorted, 25.0),
            p50: percentile(sorted, 50.0),
            p75: percentile(sorted, 75.0),
            p95: percentile(sorted, 95.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Central 95% interval (p2.5 .. p97.5).
    fn ci_95(sorted: &[f64]) -> Self {
        Self {
            lower: percentile(sorted, 2.5),
            upper: percentile(sorted, 97.5),
        }
    }
}

/// Distribution of outcomes over all simulated trade orderings.
#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloResult {
    pub simulations: usize,
    pub trade_count: usize,
    pub total_return_pct: Percentiles,
    pub max_drawdown_pct: Percentiles,
    pub final_equity: Percentiles,
    pub sharpe: Percentiles,
    pub return_ci_95: ConfidenceInterval,
    pub drawdown_ci_95: ConfidenceInterval,
    /// Percent of simulations whose drawdown reached the ruin threshold.
    pub risk_of_ruin: f64,
    /// Percent of simulations ending above the initial capital.
    pub probability_of_profit: f64,
    /// The trades replayed in their original order.
    pub original: SimulationStats,
}

/// Monte Carlo risk analysis by reshuffling trade order.
///
/// Each simulation is a Fisher-Yates permutation of the P&L sequence (never a
/// resample), replayed from the initial capital. Simulation `i` draws from a
/// `StdRng` seeded with `seed + i`, so results are reproducible and do not
/// depend on how many simulations ran before.
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
    cancel: CancelToken,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Simulation count after clamping to `1..=10_000`.
    pub fn simulations(&self) -> usize {
        self.config.simulations.clamp(1, MAX_SIMULATIONS)
    }

    pub fn simulate<P>(
        &self,
        trades: &[Trade],
        on_progress: P,
    ) -> Result<MonteCarloResult, OptimizeError>
    where
        P: FnMut(Progress),
    {
        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
        self.simulate_pnls(&pnls, on_progress)
    }

    pub fn simulate_pnls<P>(
        &self,
        pnls: &[f64],
        mut on_progress: P,
    ) -> Result<MonteCarloResult, OptimizeError>
    where
        P: FnMut(Progress),
    {
        if pnls.is_empty() {
            return Err(OptimizeError::InsufficientData(
                "Monte Carlo needs at least one trade".into(),
            ));
        }
        let total = self.simulations();
        let seed = self.config.seed;

        let mut stats = Vec::with_capacity(total);
        let mut order = pnls.to_vec();
        for i in 0..total {
            if i % PROGRESS_EVERY == 0 {
                self.cancel.check()?;
                if i > 0 {
                    on_progress(Progress::new(i, total));
                }
            }
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            order.copy_from_slice(pnls);
            order.shuffle(&mut rng);
            stats.push(self.replay(&order));
        }
        on_progress(Progress::new(total, total));

        let initial = self.config.initial_capital;
        let ruined = stats.iter().filter(|s| s.ruined).count();
        let profitable = stats.iter().filter(|s| s.final_equity > initial).count();

        let returns = sorted(stats.iter().map(|s| s.total_return_pct));
        let drawdowns = sorted(stats.iter().map(|s| s.max_drawdown_pct));
        let finals = sorted(stats.iter().map(|s| s.final_equity));
        let sharpes = sorted(stats.iter().map(|s| s.sharpe));

        let result = MonteCarloResult {
            simulations: total,
            trade_count: pnls.len(),
            total_return_pct: Percentiles::from_sorted(&returns),
            max_drawdown_pct: Percentiles::from_sorted(&drawdowns),
            final_equity: Percentiles::from_sorted(&finals),
            sharpe: Percentiles::from_sorted(&sharpes),
            return_ci_95: ConfidenceInterval::ci_95(&returns),
            drawdown_ci_95: ConfidenceInterval::ci_95(&drawdowns),
            risk_of_ruin: ruined as f64 / total as f64 * 100.0,
            probability_of_profit: profitable as f64 / total as f64 * 100.0,
            original: self.replay(pnls),
        };

        info!(
            simulations = total,
            trades = pnls.len(),
            risk_of_ruin = result.risk_of_ruin,
            median_return_pct = result.total_return_pct.p50,
            "monte carlo finished"
        );
        Ok(result)
    }

    /// Replay one P&L sequence from the initial capital.
    fn replay(&self, pnls: &[f64]) -> SimulationStats {
        let initial = self.config.initial_capital;
        let mut equity = initial;
        let mut peak = initial;
        let mut max_dd = 0.0f64;
        let mut ruined = false;
        let mut returns = Vec::with_capacity(pnls.len());

        for &pnl in pnls {
            returns.push(if equity != 0.0 { pnl / equity } else { 0.0 });
            equity += pnl;
            if equity > peak {
                peak = equity;
            }
            if peak > 0.0 {
                let dd = (peak - equity) / peak;
                max_dd = max_dd.max(dd);
                if dd >= self.config.ruin_threshold {
                    ruined = true;
                }
            }
        }

        SimulationStats {
            total_return_pct: if initial != 0.0 {
                (equity - initial) / initial * 100.0
            } else {
                0.0
            },
            max_drawdown_pct: max_dd * 100.0,
            final_equity: equity,
            sharpe: trade_sharpe(&returns),
            ruined,
        }
    }
}

impl Default for MonteCarloSimulator {
    fn default() -> Self {
        Self::new(MonteCarloConfig::default())
    }
}

/// Mean over standard deviation of per-trade returns, scaled by √trades.
fn trade_sharpe(returns: &[f64]) -> f64 {
    let std = std_dev(returns);
    if std == 0.0 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    mean / std * (returns.len() as f64).sqrt()
}

fn sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_unstable_by(|a, b| a.total_cmp(b));
    v
}

/// Linear interpolation between the closest ranks of a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}
