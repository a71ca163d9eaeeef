use serde::Serialize;
use tracing::{info, warn};

use qlab_core::{
    compute_splits, BacktestConfig, CandleStore, Metric, Params, WalkForwardConfig, WindowSplit,
};
use qlab_engine::{BacktestEngine, PerformanceMetrics};
use qlab_strategy::{Strategy, StrategyError};

use crate::control::{CancelToken, Progress};
use crate::error::OptimizeError;
use crate::grid::GridSearchOptimizer;

/// In-sample optimization and out-of-sample check of one split.
#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardWindow {
    pub split: WindowSplit,
    pub train_start: i64,
    pub train_end: i64,
    pub test_start: i64,
    pub test_end: i64,
    pub best_params: Params,
    pub in_sample_metric: f64,
    pub out_of_sample_metric: f64,
    pub in_sample_metrics: PerformanceMetrics,
    pub out_of_sample_metrics: PerformanceMetrics,
    /// `(in_sample - out_of_sample) / |in_sample| × 100`.
    pub degradation_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardResult {
    pub metric: Metric,
    pub windows: Vec<WalkForwardWindow>,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub average_sharpe: f64,
    pub max_drawdown_pct: f64,
    pub average_degradation: f64,
    /// `clamp(100 - average_degradation, 0, 100)`.
    pub robustness_score: f64,
}

/// Repeated grid search on training slices, each validated on the slice that
/// follows it.
pub struct WalkForwardAnalyzer {
    backtest: BacktestConfig,
    config: WalkForwardConfig,
    cancel: CancelToken,
}

impl WalkForwardAnalyzer {
    pub fn new(backtest: BacktestConfig, config: WalkForwardConfig) -> Self {
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

    /// Splits that [`analyze`](Self::analyze) would use for `len` candles.
    pub fn splits(&self, len: usize) -> Result<Vec<WindowSplit>, OptimizeError> {
        let cfg = &self.config;
        if cfg.num_windows == 0 {
            return Err(OptimizeError::InvalidConfig("num_windows must be > 0".into()));
        }
        if !(cfg.train_ratio > 0.0 && cfg.train_ratio < 1.0) {
            return Err(OptimizeError::InvalidConfig(format!(
                "train_ratio must be in (0, 1), got {}",
                cfg.train_ratio
            )));
        }
        let splits = compute_splits(len, cfg.window_type, cfg.num_windows, cfg.train_ratio);
        if splits.is_empty() {
            return Err(OptimizeError::InsufficientData(format!(
                "{len} candles cannot form {} walk-forward windows",
                cfg.num_windows
            )));
        }
        Ok(splits)
    }

    pub fn analyze<F, P>(
        &self,
        candles: &CandleStore,
        factory: F,
        mut on_progress: P,
    ) -> Result<WalkForwardResult, OptimizeError>
    where
        F: Fn(&Params) -> Result<Box<dyn Strategy>, StrategyError>,
        P: FnMut(Progress),
    {
        let splits = self.splits(candles.len())?;
        let metric = self.config.optimization.metric;
        info!(
            windows = splits.len(),
            window_type = ?self.config.window_type,
            %metric,
            "walk-forward started"
        );

        let grid = GridSearchOptimizer::new(self.backtest.clone(), self.config.optimization.clone())
            .with_cancel_token(self.cancel.clone());
        let mut engine = BacktestEngine::new(self.backtest.clone());
        let mut windows = Vec::with_capacity(splits.len());

        for (done, split) in splits.iter().enumerate() {
            self.cancel.check()?;
            let train = candles.slice(split.train.start, split.train.end);
            let test = candles.slice(split.test.start, split.test.end);

            let search = grid.optimize(&train, &factory, |_| {})?;
            let Some(best) = search.best else {
                warn!(window = split.index, "no valid in-sample result, window skipped");
                on_progress(Progress::new(done + 1, splits.len()));
                continue;
            };

            let oos = factory(&best.params)
                .map_err(OptimizeError::from)
                .and_then(|mut s| engine.run(&test, s.as_mut()).map_err(OptimizeError::from));
            let oos = match oos {
                Ok(result) => result,
                Err(error) => {
                    warn!(window = split.index, %error, "out-of-sample run failed, window skipped");
                    on_progress(Progress::new(done + 1, splits.len()));
                    continue;
                }
            };

            let is_value = best.metric_value;
            let oos_value = oos.metrics.value(metric);
            windows.push(WalkForwardWindow {
                split: split.clone(),
                train_start: train.timestamps[0],
                train_end: train.timestamps[train.len() - 1],
                test_start: test.timestamps[0],
                test_end: test.timestamps[test.len() - 1],
                best_params: best.params,
                in_sample_metric: is_value,
                out_of_sample_metric: oos_value,
                in_sample_metrics: best.metrics,
                out_of_sample_metrics: oos.metrics,
                degradation_pct: degradation(is_value, oos_value),
            });
            on_progress(Progress::new(done + 1, splits.len()));
        }

        let result = aggregate(metric, windows);
        info!(
            windows = result.windows.len(),
            total_return_pct = result.total_return_pct,
            robustness = result.robustness_score,
            "walk-forward finished"
        );
        Ok(result)
    }
}

fn degradation(in_sample: f64, out_of_sample: f64) -> f64 {
    if in_sample == 0.0 || !in_sample.is_finite() || !out_of_sample.is_finite() {
        return 0.0;
    }
    (in_sample - out_of_sample) / in_sample.abs() * 100.0
}

fn aggregate(metric: Metric, windows: Vec<WalkForwardWindow>) -> WalkForwardResult {
    let n = windows.len().max(1) as f64;
    let average_sharpe = windows
        .iter()
        .map(|w| w.out_of_sample_metrics.sharpe_ratio)
        .sum::<f64>()
        / n;
    let average_degradation = windows.iter().map(|w| w.degradation_pct).sum::<f64>() / n;

    WalkForwardResult {
        metric,
        total_return: windows.iter().map(|w| w.out_of_sample_metrics.total_return).sum(),
        total_return_pct: windows
            .iter()
            .map(|w| w.out_of_sample_metrics.total_return_pct)
            .sum(),
        total_trades: windows.iter().map(|w| w.out_of_sample_metrics.total_trades).sum(),
        average_sharpe,
        max_drawdown_pct: windows
            .iter()
            .map(|w| w.out_of_sample_metrics.max_drawdown_pct)
            .fold(0.0, f64::max),
        average_degradation,
        robustness_score: (100.0 - average_degradation).clamp(0.0, 100.0),
        windows,
    }
}
