use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use qlab_core::{
    total_combinations, BacktestConfig, CandleStore, Metric, OptimizationConfig, ParamRange,
    Params,
};
use qlab_engine::{BacktestEngine, PerformanceMetrics};
use qlab_strategy::{Strategy, StrategyError};

use crate::control::{CancelToken, Progress};
use crate::error::OptimizeError;

const MAX_PREALLOCATED_RUNS: usize = 4096;

/// One evaluated parameter set.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRun {
    pub params: Params,
    pub metric_value: f64,
    pub metrics: PerformanceMetrics,
    /// Set when the strategy or engine failed; `metric_value` is then the
    /// worst possible value.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub metric: Metric,
    pub maximize: bool,
    pub total_combinations: usize,
    pub best: Option<OptimizationRun>,
    /// Every evaluation, best first.
    pub results: Vec<OptimizationRun>,
}

/// Exhaustive search over the Cartesian product of parameter ranges.
pub struct GridSearchOptimizer {
    backtest: BacktestConfig,
    config: OptimizationConfig,
    cancel: CancelToken,
}

impl GridSearchOptimizer {
    pub fn new(backtest: BacktestConfig, config: OptimizationConfig) -> Self {
        Self {
            backtest,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Number of parameter sets the search visits.
    pub fn total_combinations(&self) -> Result<usize, OptimizeError> {
        total_combinations(&self.config.param_ranges).ok_or_else(|| {
            OptimizeError::InvalidConfig("parameter grid has too many combinations".into())
        })
    }

    /// Run the search. `factory` builds a fresh strategy per parameter set.
    pub fn optimize<F, P>(
        &self,
        candles: &CandleStore,
        factory: F,
        mut on_progress: P,
    ) -> Result<OptimizationResult, OptimizeError>
    where
        F: Fn(&Params) -> Result<Box<dyn Strategy>, StrategyError>,
        P: FnMut(Progress),
    {
        if self.config.param_ranges.is_empty() {
            return Err(OptimizeError::EmptyParamRanges);
        }
        if candles.is_empty() {
            return Err(OptimizeError::EmptyCandles);
        }

        let total = self.total_combinations()?;
        let metric = self.config.metric;
        let maximize = self.config.maximize;
        info!(combinations = total, %metric, maximize, "grid search started");

        let mut engine = BacktestEngine::new(self.backtest.clone());
        let mut results = Vec::with_capacity(total.min(MAX_PREALLOCATED_RUNS));

        for params in Combinations::new(&self.config.param_ranges) {
            self.cancel.check()?;
            results.push(evaluate(&mut engine, candles, &factory, params, metric, maximize));
            on_progress(Progress::new(results.len(), total));
        }

        let best = select_best(&results, maximize).cloned();
        sort_runs(&mut results, maximize);

        match &best {
            Some(run) => {
                info!(best = run.metric_value, params = ?run.params, "grid search finished")
            }
            None => warn!("grid search finished without a finite result"),
        }

        Ok(OptimizationResult {
            metric,
            maximize,
            total_combinations: total,
            best,
            results,
        })
    }
}

/// Odometer over parameter ranges in key order; the last key turns fastest.
pub struct Combinations<'a> {
    ranges: Vec<(&'a String, &'a ParamRange)>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a> Combinations<'a> {
    pub fn new(ranges: &'a BTreeMap<String, ParamRange>) -> Self {
        Self {
            ranges: ranges.iter().collect(),
            indices: vec![0; ranges.len()],
            done: ranges.is_empty(),
        }
    }
}

impl Iterator for Combinations<'_> {
    type Item = Params;

    fn next(&mut self) -> Option<Params> {
        if self.done {
            return None;
        }
        let current: Params = self
            .ranges
            .iter()
            .zip(&self.indices)
            .map(|((name, range), &k)| ((*name).clone(), range.value_at(k)))
            .collect();

        // Advance
        self.done = true;
        for pos in (0..self.ranges.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.ranges[pos].1.count() {
                self.done = false;
                break;
            }
            self.indices[pos] = 0;
        }
        Some(current)
    }
}

/// Worst possible value for the optimization direction.
#[inline]
pub(crate) fn worst(maximize: bool) -> f64 {
    if maximize {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    }
}

/// Build, run and score one parameter set. Failures become worst-case runs.
pub(crate) fn evaluate<F>(
    engine: &mut BacktestEngine,
    candles: &CandleStore,
    factory: &F,
    params: Params,
    metric: Metric,
    maximize: bool,
) -> OptimizationRun
where
    F: Fn(&Params) -> Result<Box<dyn Strategy>, StrategyError>,
{
    let outcome = factory(&params)
        .map_err(|e| e.to_string())
        .and_then(|mut strategy| {
            engine
                .run(candles, strategy.as_mut())
                .map_err(|e| e.to_string())
        });

    match outcome {
        Ok(result) => OptimizationRun {
            metric_value: result.metrics.value(metric),
            metrics: result.metrics,
            params,
            error: None,
        },
        Err(error) => {
            warn!(params = ?params, %error, "evaluation failed");
            OptimizationRun {
                params,
                metric_value: worst(maximize),
                metrics: PerformanceMetrics::default(),
                error: Some(error),
            }
        }
    }
}

/// Orders metric values best-first for the optimization direction.
pub(crate) fn compare_values(a: f64, b: f64, maximize: bool) -> Ordering {
    if maximize {
        b.total_cmp(&a)
    } else {
        a.total_cmp(&b)
    }
}

pub(crate) fn sort_runs(runs: &mut [OptimizationRun], maximize: bool) {
    runs.sort_by(|a, b| compare_values(a.metric_value, b.metric_value, maximize));
}

/// Best successful run with a finite metric value.
pub(crate) fn select_best(runs: &[OptimizationRun], maximize: bool) -> Option<&OptimizationRun> {
    runs.iter()
        .filter(|r| r.error.is_none() && r.metric_value.is_finite())
        .min_by(|a, b| compare_values(a.metric_value, b.metric_value, maximize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlab_core::params;

    fn ranges(pairs: &[(&str, ParamRange)]) -> BTreeMap<String, ParamRange> {
        pairs.iter().map(|(k, r)| (k.to_string(), *r)).collect()
    }

    fn run(value: f64) -> OptimizationRun {
        OptimizationRun {
            params: params([("x", value)]),
            metric_value: value,
            metrics: PerformanceMetrics::default(),
            error: None,
        }
    }

    #[test]
    fn test_odometer_order_and_count() {
        let r = ranges(&[
            ("a", ParamRange::new(1.0, 2.0, 1.0)),
            ("b", ParamRange::new(0.1, 0.3, 0.1)),
        ]);
        let all: Vec<Params> = Combinations::new(&r).collect();
        assert_eq!(Some(all.len()), total_combinations(&r));
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], params([("a", 1.0), ("b", 0.1)]));
        assert_eq!(all[1], params([("a", 1.0), ("b", 0.2)]));
        assert_eq!(all[3], params([("a", 2.0), ("b", 0.1)]));
        assert_eq!(all[5], params([("a", 2.0), ("b", 0.3)]));
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let fine = ParamRange::new(0.0, 1.0, 1e-10);
        let config = OptimizationConfig {
            param_ranges: ranges(&[("a", fine), ("b", fine), ("c", fine)]),
            ..OptimizationConfig::default()
        };
        let grid = GridSearchOptimizer::new(BacktestConfig::default(), config);
        assert!(matches!(
            grid.total_combinations(),
            Err(OptimizeError::InvalidConfig(_))
        ));

        let mut candles = CandleStore::with_capacity(1);
        candles.push(1_735_689_600_000, 100.0, 101.0, 99.0, 100.0, 1.0);
        let factory = |p: &Params| qlab_strategy::create_strategy("sma_crossover", p);
        let result = grid.optimize(&candles, factory, |_| {});
        assert!(matches!(result, Err(OptimizeError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_ranges_yield_nothing() {
        let r = BTreeMap::new();
        assert_eq!(Combinations::new(&r).count(), 0);
    }

    #[test]
    fn test_best_skips_non_finite() {
        let mut runs = vec![run(1.0), run(f64::INFINITY), run(3.0), run(f64::NEG_INFINITY)];
        assert_eq!(select_best(&runs, true).unwrap().metric_value, 3.0);
        assert_eq!(select_best(&runs, false).unwrap().metric_value, 1.0);

        sort_runs(&mut runs, true);
        assert_eq!(runs[0].metric_value, f64::INFINITY);
        assert_eq!(runs[1].metric_value, 3.0);
        assert_eq!(runs[3].metric_value, f64::NEG_INFINITY);
    }
}
