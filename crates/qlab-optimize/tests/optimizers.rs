use std::collections::BTreeMap;

use qlab_core::{
    params, total_combinations, BacktestConfig, CandleStore, Direction, ExitReason,
    GeneticConfig, Metric, MonteCarloConfig, OptimizationConfig, ParamRange, Params, Trade,
    WalkForwardConfig, WindowType,
};
use qlab_optimize::{
    CancelToken, GeneticOptimizer, GridSearchOptimizer, MonteCarloSimulator, OptimizeError,
    WalkForwardAnalyzer,
};
use qlab_strategy::{create_strategy, Strategy, StrategyError};

const MINUTE: i64 = 60_000;
const BASE_TS: i64 = 1_735_689_600_000;

fn wave_candles(n: usize) -> CandleStore {
    let mut store = CandleStore::with_capacity(n);
    for i in 0..n {
        let x = i as f64;
        let price = 100.0 + (x / 9.0).sin() * 4.0 + (x / 37.0).sin() * 6.0 + x * 0.005;
        store.push(BASE_TS + i as i64 * MINUTE, price, price + 0.4, price - 0.4, price, 1_000.0);
    }
    store
}

fn sma_factory(p: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
    create_strategy("sma_crossover", p)
}

fn sma_ranges() -> BTreeMap<String, ParamRange> {
    [
        ("fast_period".to_string(), ParamRange::new(3.0, 9.0, 2.0)),
        ("slow_period".to_string(), ParamRange::new(20.0, 40.0, 10.0)),
    ]
    .into_iter()
    .collect()
}

fn optimization(metric: Metric) -> OptimizationConfig {
    OptimizationConfig {
        param_ranges: sma_ranges(),
        metric,
        maximize: true,
    }
}

fn trade(id: u64, pnl: f64) -> Trade {
    Trade {
        id,
        direction: Direction::Long,
        entry_time: BASE_TS + id as i64 * MINUTE,
        entry_price: 100.0,
        exit_time: BASE_TS + (id as i64 + 1) * MINUTE,
        exit_price: 100.0 + pnl / 100.0,
        size: 10_000.0,
        pnl,
        pnl_percent: pnl / 100.0,
        commission: 0.0,
        exit_reason: ExitReason::Signal,
    }
}

#[test]
fn grid_visits_every_combination_once() {
    let candles = wave_candles(300);
    let grid =
        GridSearchOptimizer::new(BacktestConfig::default(), optimization(Metric::TotalReturn));

    let mut progress = Vec::new();
    let result = grid.optimize(&candles, sma_factory, |p| progress.push(p)).unwrap();

    // 4 fast values × 3 slow values
    assert_eq!(total_combinations(&sma_ranges()), Some(12));
    assert_eq!(result.total_combinations, 12);
    assert_eq!(result.results.len(), 12);
    assert_eq!(progress.len(), 12);
    assert_eq!(progress.last().unwrap().fraction, 1.0);

    let mut seen: Vec<Params> = result.results.iter().map(|r| r.params.clone()).collect();
    seen.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    seen.dedup();
    assert_eq!(seen.len(), 12);

    let best = result.best.unwrap();
    assert!(result
        .results
        .iter()
        .all(|r| r.metric_value <= best.metric_value || !r.metric_value.is_finite()));
    assert_eq!(result.results[0].metric_value, best.metric_value);
}

#[test]
fn grid_records_failed_evaluations_as_worst() {
    let candles = wave_candles(200);
    let config = OptimizationConfig {
        // fast >= slow for the second value: construction fails
        param_ranges: [
            ("fast_period".to_string(), ParamRange::new(5.0, 25.0, 20.0)),
            ("slow_period".to_string(), ParamRange::fixed(20.0)),
        ]
        .into_iter()
        .collect(),
        metric: Metric::TotalReturn,
        maximize: true,
    };
    let grid = GridSearchOptimizer::new(BacktestConfig::default(), config);
    let result = grid.optimize(&candles, sma_factory, |_| {}).unwrap();

    assert_eq!(result.results.len(), 2);
    let failed = result.results.iter().find(|r| r.error.is_some()).unwrap();
    assert_eq!(failed.metric_value, f64::NEG_INFINITY);
    assert_eq!(result.best.unwrap().params["fast_period"], 5.0);
}

#[test]
fn grid_rejects_empty_inputs_and_honours_cancel() {
    let candles = wave_candles(100);
    let empty = GridSearchOptimizer::new(BacktestConfig::default(), OptimizationConfig::default());
    assert!(matches!(
        empty.optimize(&candles, sma_factory, |_| {}),
        Err(OptimizeError::EmptyParamRanges)
    ));

    let grid =
        GridSearchOptimizer::new(BacktestConfig::default(), optimization(Metric::SharpeRatio));
    assert!(matches!(
        grid.optimize(&CandleStore::new(), sma_factory, |_| {}),
        Err(OptimizeError::EmptyCandles)
    ));

    let token = CancelToken::new();
    let grid = grid.with_cancel_token(token.clone());
    let mut evaluated = 0;
    let result = grid.optimize(&candles, sma_factory, |_| {
        evaluated += 1;
        if evaluated == 3 {
            token.cancel();
        }
    });
    assert!(matches!(result, Err(OptimizeError::Cancelled)));
    assert_eq!(evaluated, 3);
}

#[test]
fn genetic_is_reproducible_and_deduplicated() {
    let candles = wave_candles(300);
    let genetic = GeneticConfig {
        population_size: 8,
        generations: 5,
        seed: 7,
        ..GeneticConfig::default()
    };
    let optimizer = GeneticOptimizer::new(
        BacktestConfig::default(),
        optimization(Metric::TotalReturnPct),
        genetic,
    );

    let mut generations = Vec::new();
    let a = optimizer
        .optimize(&candles, sma_factory, |g| generations.push(g.generation))
        .unwrap();
    let b = optimizer.optimize(&candles, sma_factory, |_| {}).unwrap();

    assert_eq!(a.generations_run, b.generations_run);
    assert_eq!(a.evaluations, b.evaluations);
    assert_eq!(a.fitness_history, b.fitness_history);
    assert_eq!(
        a.best.as_ref().map(|r| r.params.clone()),
        b.best.as_ref().map(|r| r.params.clone())
    );
    assert_eq!(generations.len(), a.generations_run);
    assert!(a.generations_run <= 5);

    // Ledger holds unique parameter sets drawn from the grid.
    assert!(a.results.len() <= 12);
    for (i, run) in a.results.iter().enumerate() {
        assert!(a.results[i + 1..].iter().all(|other| other.params != run.params));
        assert!(sma_ranges()["fast_period"].values().contains(&run.params["fast_period"]));
    }

    // Elitism keeps the best-ever fitness non-decreasing.
    assert!(a.fitness_history.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn genetic_different_seed_still_valid() {
    let candles = wave_candles(200);
    let optimizer = GeneticOptimizer::new(
        BacktestConfig::default(),
        optimization(Metric::SharpeRatio),
        GeneticConfig {
            population_size: 6,
            generations: 3,
            seed: 99,
            ..GeneticConfig::default()
        },
    );
    let result = optimizer.optimize(&candles, sma_factory, |_| {}).unwrap();
    assert!(result.evaluations >= 6);
    assert!(!result.results.is_empty());
}

fn failing_factory(_: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
    Err(StrategyError::UnknownStrategy("missing".into()))
}

#[test]
fn genetic_survives_when_every_evaluation_fails() {
    let candles = wave_candles(200);
    let optimizer = GeneticOptimizer::new(
        BacktestConfig::default(),
        optimization(Metric::TotalReturn),
        GeneticConfig {
            population_size: 4,
            generations: 20,
            elite_count: 2,
            stagnation_limit: 3,
            seed: 11,
            ..GeneticConfig::default()
        },
    );

    let result = optimizer.optimize(&candles, failing_factory, |_| {}).unwrap();

    // -inf never improves on the starting best, so every generation is stagnant.
    assert_eq!(result.generations_run, 3);
    // 4 in the first generation, then 2 non-elite children per generation.
    assert_eq!(result.evaluations, 8);
    assert!(result.best.is_none());
    assert!(!result.results.is_empty());
    assert!(result
        .results
        .iter()
        .all(|r| r.error.is_some() && r.metric_value == f64::NEG_INFINITY));
    assert!(result.fitness_history.iter().all(|f| *f == f64::NEG_INFINITY));
}

#[test]
fn genetic_stops_after_stagnation_limit() {
    let candles = wave_candles(300);
    let config = OptimizationConfig {
        param_ranges: [
            ("fast_period".to_string(), ParamRange::fixed(5.0)),
            ("slow_period".to_string(), ParamRange::fixed(20.0)),
        ]
        .into_iter()
        .collect(),
        metric: Metric::TotalReturn,
        maximize: true,
    };
    let optimizer = GeneticOptimizer::new(
        BacktestConfig::default(),
        config,
        GeneticConfig {
            population_size: 5,
            generations: 30,
            stagnation_limit: 3,
            ..GeneticConfig::default()
        },
    );

    let mut seen = Vec::new();
    let result = optimizer.optimize(&candles, sma_factory, |g| seen.push(g.generation)).unwrap();

    // Generation 0 improves on -inf; generations 1..=3 do not.
    assert_eq!(result.generations_run, 4);
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(result.results.len(), 1);
    assert!(result.best.is_some());
    assert!(result.fitness_history.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn genetic_minimizes_when_asked() {
    let candles = wave_candles(300);
    let config = OptimizationConfig {
        maximize: false,
        ..optimization(Metric::MaxDrawdownPct)
    };

    let grid = GridSearchOptimizer::new(BacktestConfig::default(), config.clone());
    let grid_best = grid.optimize(&candles, sma_factory, |_| {}).unwrap().best.unwrap();

    let optimizer = GeneticOptimizer::new(
        BacktestConfig::default(),
        config,
        GeneticConfig {
            population_size: 12,
            generations: 10,
            seed: 3,
            ..GeneticConfig::default()
        },
    );
    let result = optimizer.optimize(&candles, sma_factory, |_| {}).unwrap();
    let best = result.best.as_ref().unwrap();

    // Results run from the smallest drawdown up.
    assert!(result
        .results
        .windows(2)
        .all(|w| w[0].metric_value <= w[1].metric_value));
    assert_eq!(result.results[0].metric_value, best.metric_value);
    // The exhaustive search is a lower bound for anything the genetic search finds.
    assert!(best.metric_value >= grid_best.metric_value);
    // Fitness is the negated drawdown.
    let last = *result.fitness_history.last().unwrap();
    assert_eq!(last, -best.metric_value);
}

#[test]
fn walk_forward_skips_windows_without_a_result() {
    let candles = wave_candles(600);
    let analyzer = WalkForwardAnalyzer::new(
        BacktestConfig::default(),
        WalkForwardConfig {
            window_type: WindowType::Rolling,
            train_ratio: 0.7,
            num_windows: 3,
            optimization: optimization(Metric::TotalReturn),
        },
    );

    let mut progress = Vec::new();
    let result = analyzer
        .analyze(&candles, failing_factory, |p| progress.push(p.completed))
        .unwrap();

    assert_eq!(progress, vec![1, 2, 3]);
    assert!(result.windows.is_empty());
    assert_eq!(result.total_trades, 0);
    assert_eq!(result.total_return, 0.0);
    assert_eq!(result.robustness_score, 100.0);
}

#[test]
fn walk_forward_rolling_windows_do_not_overlap() {
    let candles = wave_candles(1_000);
    let analyzer = WalkForwardAnalyzer::new(
        BacktestConfig::default(),
        WalkForwardConfig {
            window_type: WindowType::Rolling,
            train_ratio: 0.7,
            num_windows: 4,
            optimization: optimization(Metric::TotalReturn),
        },
    );

    let mut progress = Vec::new();
    let result = analyzer.analyze(&candles, sma_factory, |p| progress.push(p.completed)).unwrap();
    assert_eq!(progress, vec![1, 2, 3, 4]);
    assert!(!result.windows.is_empty());

    for pair in result.windows.windows(2) {
        assert!(pair[0].split.test.end <= pair[1].split.train.start);
        assert!(pair[0].test_end < pair[1].train_start);
    }
    for w in &result.windows {
        assert_eq!(w.split.train.end, w.split.test.start);
        assert!(w.train_end < w.test_start);
    }

    let summed: usize = result.windows.iter().map(|w| w.out_of_sample_metrics.total_trades).sum();
    assert_eq!(result.total_trades, summed);
    assert!((0.0..=100.0).contains(&result.robustness_score));
}

#[test]
fn walk_forward_anchored_windows_start_at_zero() {
    let candles = wave_candles(1_000);
    let analyzer = WalkForwardAnalyzer::new(
        BacktestConfig::default(),
        WalkForwardConfig {
            window_type: WindowType::Anchored,
            train_ratio: 0.6,
            num_windows: 3,
            optimization: optimization(Metric::TotalReturn),
        },
    );

    let splits = analyzer.splits(candles.len()).unwrap();
    assert_eq!(splits.len(), 3);
    assert!(splits.iter().all(|s| s.train.start == 0));
    assert!(splits.windows(2).all(|w| w[1].train.end > w[0].train.end));

    let result = analyzer.analyze(&candles, sma_factory, |_| {}).unwrap();
    assert!(result.windows.iter().all(|w| w.train_start == BASE_TS));
}

#[test]
fn walk_forward_rejects_bad_configs() {
    let candles = wave_candles(100);
    let bad_ratio = WalkForwardAnalyzer::new(
        BacktestConfig::default(),
        WalkForwardConfig {
            window_type: WindowType::Rolling,
            train_ratio: 0.0,
            num_windows: 3,
            optimization: optimization(Metric::TotalReturn),
        },
    );
    assert!(matches!(
        bad_ratio.analyze(&candles, sma_factory, |_| {}),
        Err(OptimizeError::InvalidConfig(_))
    ));
}

#[test]
fn monte_carlo_single_simulation_matches_original_return() {
    let trades: Vec<Trade> = [120.0, -40.0, 75.0, -90.0, 30.0]
        .iter()
        .enumerate()
        .map(|(i, &pnl)| trade(i as u64 + 1, pnl))
        .collect();
    let simulator = MonteCarloSimulator::new(MonteCarloConfig {
        simulations: 1,
        initial_capital: 10_000.0,
        ..MonteCarloConfig::default()
    });

    let result = simulator.simulate(&trades, |_| {}).unwrap();
    assert_eq!(result.simulations, 1);
    assert!((result.total_return_pct.p50 - 0.95).abs() < 1e-9);
    assert!((result.original.total_return_pct - 0.95).abs() < 1e-9);
    assert!((result.final_equity.p50 - 10_095.0).abs() < 1e-9);
}

#[test]
fn monte_carlo_alternating_trades_never_ruin() {
    let trades: Vec<Trade> = (0..10)
        .map(|i| trade(i + 1, if i % 2 == 0 { 100.0 } else { -50.0 }))
        .collect();
    let simulator = MonteCarloSimulator::new(MonteCarloConfig {
        simulations: 500,
        initial_capital: 10_000.0,
        ruin_threshold: 0.99,
        seed: 42,
    });

    let result = simulator.simulate(&trades, |_| {}).unwrap();
    assert!(result.risk_of_ruin.abs() < 1e-9);
    assert_eq!(result.probability_of_profit, 100.0);
    assert!(result.return_ci_95.lower <= result.return_ci_95.upper);
    assert!(result.max_drawdown_pct.p5 <= result.max_drawdown_pct.p95);
    assert!(result.max_drawdown_pct.p95 <= 100.0);
}

#[test]
fn monte_carlo_report_serializes() {
    let trades = vec![trade(1, 10.0), trade(2, -5.0)];
    let result = MonteCarloSimulator::new(MonteCarloConfig {
        simulations: 10,
        ..MonteCarloConfig::default()
    })
    .simulate(&trades, |_| {})
    .unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["simulations"], 10);
    assert!(json["total_return_pct"]["p50"].is_number());
}

#[test]
fn grid_result_params_are_structurally_comparable() {
    assert_eq!(
        params([("slow_period", 20.0), ("fast_period", 5.0)]),
        params([("fast_period", 5.0), ("slow_period", 20.0)])
    );
}
