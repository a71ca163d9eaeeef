use rayon::prelude::*;
use serde::Serialize;

use qlab_core::{BacktestConfig, CandleStore, MonteCarloConfig, Params};
use qlab_engine::{BacktestEngine, BacktestResult};
use qlab_strategy::create_strategy;

use crate::error::OptimizeError;
use crate::monte_carlo::{MonteCarloResult, MonteCarloSimulator};

/// Backtest + Monte Carlo for a single strategy.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub backtest: BacktestResult,
    /// `None` when the backtest produced no trades.
    pub monte_carlo: Option<MonteCarloResult>,
}

/// Backtests several strategies over the same candles in parallel.
///
/// Every task builds its own strategy and engine, so nothing mutable is
/// shared between threads. Results keep the input order.
pub struct ComparisonRunner {
    backtest: BacktestConfig,
    monte_carlo: MonteCarloConfig,
}

impl ComparisonRunner {
    pub fn new(backtest: BacktestConfig, monte_carlo: MonteCarloConfig) -> Self {
        Self {
            backtest,
            monte_carlo,
        }
    }

    /// Run every `(strategy name, params)` pair.
    pub fn run_all(
        &self,
        candles: &CandleStore,
        strategies: &[(String, Params)],
    ) -> Vec<Result<ComparisonResult, OptimizeError>> {
        strategies
            .par_iter()
            .map(|(name, params)| self.run_one(candles, name, params))
            .collect()
    }

    fn run_one(
        &self,
        candles: &CandleStore,
        name: &str,
        params: &Params,
    ) -> Result<ComparisonResult, OptimizeError> {
        let mut strategy = create_strategy(name, params)?;
        let mut engine = BacktestEngine::new(self.backtest.clone());
        let backtest = engine.run(candles, strategy.as_mut())?;

        let monte_carlo = if backtest.trades.is_empty() {
            None
        } else {
            let simulator = MonteCarloSimulator::new(MonteCarloConfig {
                initial_capital: self.backtest.initial_capital,
                ..self.monte_carlo.clone()
            });
            Some(simulator.simulate(&backtest.trades, |_| {})?)
        };

        Ok(ComparisonResult {
            backtest,
            monte_carlo,
        })
    }
}
