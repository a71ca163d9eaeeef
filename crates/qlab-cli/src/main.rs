use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use qlab_core::{AppConfig, CandleStore, Params};
use qlab_engine::{BacktestEngine, BacktestResult, PerformanceMetrics};
use qlab_optimize::{
    ComparisonResult, ComparisonRunner, GeneticOptimizer, GeneticResult, GridSearchOptimizer,
    MonteCarloResult, MonteCarloSimulator, OptimizationResult, WalkForwardAnalyzer,
    WalkForwardResult,
};
use qlab_strategy::{create_strategy, Strategy, StrategyError, STRATEGY_NAMES};

#[derive(Parser, Debug)]
#[command(name = "qlab", about = "Deterministic strategy backtesting and optimization")]
struct Cli {
    /// Path to TOML config file(s), comma-separated for merge
    #[arg(long, global = true)]
    config: Option<String>,

    /// Output file path (stdout if not specified)
    #[arg(long, global = true)]
    output_file: Option<PathBuf>,

    /// Initial capital, overrides the config
    #[arg(long, global = true)]
    initial_capital: Option<f64>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Path to CSV candle data file
    #[arg(long)]
    candles: PathBuf,

    /// Strategy name, overrides `[strategy] name`
    #[arg(long)]
    strategy: Option<String>,

    /// Strategy parameter override, e.g. `--param fast_period=8`
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, f64)>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backtest a single strategy
    Backtest {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Backtest several strategies in parallel, each followed by Monte Carlo
    Compare {
        /// Path to CSV candle data file
        #[arg(long)]
        candles: PathBuf,

        /// Strategies to compare (comma-separated, or "all")
        #[arg(long, default_value = "all")]
        strategies: String,

        /// Monte Carlo simulations per strategy
        #[arg(long)]
        simulations: Option<usize>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Exhaustive grid search over `[optimization.param_ranges]`
    Optimize {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Genetic search over `[optimization.param_ranges]`
    Genetic {
        #[command(flatten)]
        data: DataArgs,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Walk-forward analysis with grid search per window
    WalkForward {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Backtest, then reshuffle the trades
    MonteCarlo {
        #[command(flatten)]
        data: DataArgs,

        /// Number of simulations
        #[arg(long)]
        simulations: Option<usize>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },
    /// List available strategies and their default parameters
    List,
}

/// JSON output envelope.
#[derive(Debug, Serialize)]
struct Report<T: Serialize> {
    meta: ReportMeta,
    result: T,
}

#[derive(Debug, Serialize)]
struct ReportMeta {
    command: &'static str,
    candle_file: String,
    total_candles: usize,
    strategy: Option<String>,
    elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
struct MonteCarloReport {
    backtest: BacktestResult,
    monte_carlo: MonteCarloResult,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(capital) = cli.initial_capital {
        config.backtest.initial_capital = capital;
    }
    let start = Instant::now();

    match &cli.command {
        Command::Backtest { data } => {
            let (candles, name, params) = prepare(&config, data)?;
            let mut strategy = create_strategy(&name, &params)?;
            let mut engine = BacktestEngine::new(config.backtest.clone());
            let result = engine.run(&candles, strategy.as_mut())?;

            print_metrics_header(&format!("Backtest: {name}"), &candles);
            print_metrics_row(&name, &result.metrics);
            eprintln!("{}", "=".repeat(80));
            emit(&cli, "backtest", &data.candles, &candles, Some(name), start, result)
        }
        Command::Compare {
            candles: path,
            strategies,
            simulations,
            seed,
        } => {
            let candles = load_candles(path)?;
            let names = parse_strategy_list(strategies)?;
            let tasks: Vec<(String, Params)> = names
                .into_iter()
                .map(|name| {
                    let params = if name == config.strategy.name {
                        config.strategy.params.clone()
                    } else {
                        Params::new()
                    };
                    (name, params)
                })
                .collect();

            let mut mc = config.monte_carlo.clone();
            mc.simulations = simulations.unwrap_or(mc.simulations);
            mc.seed = seed.unwrap_or(mc.seed);
            info!(strategies = tasks.len(), "running comparison");
            let results = ComparisonRunner::new(config.backtest.clone(), mc)
                .run_all(&candles, &tasks)
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;

            print_comparison(&candles, &results);
            emit(&cli, "compare", path, &candles, None, start, results)
        }
        Command::Optimize { data } => {
            let (candles, name, base) = prepare(&config, data)?;
            let grid =
                GridSearchOptimizer::new(config.backtest.clone(), config.optimization.clone());
            let combinations = grid.total_combinations()?;
            info!(strategy = %name, combinations, "optimizing");
            let result = grid.optimize(&candles, factory(&name, &base), |p| {
                debug!(completed = p.completed, total = p.total, "grid progress");
            })?;

            print_optimization(&result);
            emit(&cli, "optimize", &data.candles, &candles, Some(name), start, result)
        }
        Command::Genetic { data, seed } => {
            let (candles, name, base) = prepare(&config, data)?;
            let mut genetic = config.genetic.clone();
            genetic.seed = seed.unwrap_or(genetic.seed);
            let optimizer = GeneticOptimizer::new(
                config.backtest.clone(),
                config.optimization.clone(),
                genetic,
            );
            let result = optimizer.optimize(&candles, factory(&name, &base), |g| {
                info!(
                    generation = g.generation,
                    best_fitness = g.best_fitness,
                    evaluations = g.evaluations,
                    "generation"
                );
            })?;

            print_genetic(&result);
            emit(&cli, "genetic", &data.candles, &candles, Some(name), start, result)
        }
        Command::WalkForward { data } => {
            let (candles, name, base) = prepare(&config, data)?;
            let analyzer =
                WalkForwardAnalyzer::new(config.backtest.clone(), config.walk_forward_config());
            let result = analyzer.analyze(&candles, factory(&name, &base), |p| {
                info!(window = p.completed, total = p.total, "walk-forward window done");
            })?;

            print_walk_forward(&result);
            emit(&cli, "walk-forward", &data.candles, &candles, Some(name), start, result)
        }
        Command::MonteCarlo {
            data,
            simulations,
            seed,
        } => {
            let (candles, name, params) = prepare(&config, data)?;
            let mut strategy = create_strategy(&name, &params)?;
            let backtest =
                BacktestEngine::new(config.backtest.clone()).run(&candles, strategy.as_mut())?;

            let mut mc = config.monte_carlo.clone();
            mc.simulations = simulations.unwrap_or(mc.simulations);
            mc.seed = seed.unwrap_or(mc.seed);
            mc.initial_capital = config.backtest.initial_capital;
            let monte_carlo = MonteCarloSimulator::new(mc)
                .simulate(&backtest.trades, |p| {
                    debug!(completed = p.completed, total = p.total, "monte carlo progress");
                })
                .context("Monte Carlo needs a backtest that produces trades")?;

            print_monte_carlo(&name, &monte_carlo);
            let report = MonteCarloReport {
                backtest,
                monte_carlo,
            };
            emit(&cli, "monte-carlo", &data.candles, &candles, Some(name), start, report)
        }
        Command::List => {
            println!("\nAvailable strategies:");
            for name in STRATEGY_NAMES {
                let defaults = qlab_strategy::default_params(name)?;
                let params: Vec<String> =
                    defaults.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("  - {:<22} {}", name, params.join(", "));
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn load_config(arg: Option<&str>) -> Result<AppConfig> {
    let Some(arg) = arg else {
        return Ok(AppConfig::default());
    };
    let paths: Vec<PathBuf> = arg.split(',').map(|p| PathBuf::from(p.trim())).collect();
    let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
    AppConfig::from_toml_files(&refs).with_context(|| format!("loading config from {arg}"))
}

fn load_candles(path: &Path) -> Result<CandleStore> {
    let load_start = Instant::now();
    let candles = CandleStore::from_csv(path)
        .with_context(|| format!("loading candles from {}", path.display()))?;
    candles
        .validate()
        .with_context(|| format!("invalid candles in {}", path.display()))?;
    info!(
        candles = candles.len(),
        elapsed_ms = load_start.elapsed().as_secs_f64() * 1000.0,
        "candles loaded"
    );
    Ok(candles)
}

/// Candles, strategy name and parameters with CLI overrides applied.
fn prepare(config: &AppConfig, data: &DataArgs) -> Result<(CandleStore, String, Params)> {
    let candles = load_candles(&data.candles)?;
    let name = data
        .strategy
        .clone()
        .unwrap_or_else(|| config.strategy.name.clone());
    let mut params = config.strategy.params.clone();
    params.extend(data.params.iter().cloned());
    Ok((candles, name, params))
}

/// Strategy factory for the optimizers. Fixed `base` params are overridden
/// by each candidate's values.
fn factory<'a>(
    name: &'a str,
    base: &'a Params,
) -> impl Fn(&Params) -> Result<Box<dyn Strategy>, StrategyError> + 'a {
    move |candidate: &Params| {
        let mut params = base.clone();
        params.extend(candidate.iter().map(|(k, v)| (k.clone(), *v)));
        create_strategy(name, &params)
    }
}

fn parse_param(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_strategy_list(list: &str) -> Result<Vec<String>> {
    if list.trim().eq_ignore_ascii_case("all") {
        return Ok(STRATEGY_NAMES.iter().map(|s| s.to_string()).collect());
    }
    let names: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        bail!("no strategies specified");
    }
    Ok(names)
}

fn emit<T: Serialize>(
    cli: &Cli,
    command: &'static str,
    candle_file: &Path,
    candles: &CandleStore,
    strategy: Option<String>,
    start: Instant,
    result: T,
) -> Result<()> {
    let elapsed = start.elapsed();
    let report = Report {
        meta: ReportMeta {
            command,
            candle_file: candle_file.display().to_string(),
            total_candles: candles.len(),
            strategy,
            elapsed_ms: elapsed.as_millis(),
        },
        result,
    };
    let json = serde_json::to_string_pretty(&report).context("serializing report")?;

    if let Some(output_path) = &cli.output_file {
        std::fs::write(output_path, &json)
            .with_context(|| format!("writing {}", output_path.display()))?;
        eprintln!("Results written to {:?}", output_path);
    } else {
        println!("{}", json);
    }
    eprintln!("\nTotal elapsed: {:.1}ms", elapsed.as_secs_f64() * 1000.0);
    Ok(())
}

fn print_metrics_header(title: &str, candles: &CandleStore) {
    eprintln!("\n{}", "=".repeat(80));
    eprintln!("{title}");
    eprintln!("{}", "=".repeat(80));
    eprintln!("Candles: {}", candles.len());
    eprintln!("{}", "-".repeat(80));
    eprintln!(
        "{:<22} {:>7} {:>8} {:>8} {:>8} {:>10} {:>8}",
        "Strategy", "Trades", "WinRate", "Sharpe", "MaxDD", "Return", "PF"
    );
    eprintln!("{}", "-".repeat(80));
}

fn print_metrics_row(name: &str, m: &PerformanceMetrics) {
    eprintln!(
        "{:<22} {:>7} {:>7.1}% {:>8.2} {:>7.2}% {:>9.2}% {:>8.2}",
        name,
        m.total_trades,
        m.win_rate,
        m.sharpe_ratio,
        m.max_drawdown_pct,
        m.total_return_pct,
        m.profit_factor,
    );
}

fn print_comparison(candles: &CandleStore, results: &[ComparisonResult]) {
    print_metrics_header("Strategy Comparison", candles);
    for r in results {
        print_metrics_row(&r.backtest.strategy, &r.backtest.metrics);
    }
    eprintln!("{}", "-".repeat(80));
    eprintln!("Monte Carlo:");
    for r in results {
        match &r.monte_carlo {
            Some(mc) => eprintln!(
                "  {}: return CI [{:.2}%, {:.2}%], median DD {:.2}%, ruin {:.1}%",
                r.backtest.strategy,
                mc.return_ci_95.lower,
                mc.return_ci_95.upper,
                mc.max_drawdown_pct.p50,
                mc.risk_of_ruin,
            ),
            None => eprintln!("  {}: no trades", r.backtest.strategy),
        }
    }
    eprintln!("{}", "=".repeat(80));
}

fn print_optimization(result: &OptimizationResult) {
    eprintln!("\n{}", "=".repeat(80));
    eprintln!(
        "Grid search: {} combinations, metric {} ({})",
        result.total_combinations,
        result.metric,
        if result.maximize { "max" } else { "min" }
    );
    eprintln!("{}", "-".repeat(80));
    for run in result.results.iter().take(10) {
        eprintln!("{:>12.4}  {:?}", run.metric_value, run.params);
    }
    match &result.best {
        Some(best) => eprintln!("Best: {:.4} {:?}", best.metric_value, best.params),
        None => eprintln!("Best: none"),
    }
    eprintln!("{}", "=".repeat(80));
}

fn print_genetic(result: &GeneticResult) {
    eprintln!("\n{}", "=".repeat(80));
    eprintln!(
        "Genetic search: {} generations, {} evaluations, {} unique",
        result.generations_run,
        result.evaluations,
        result.results.len()
    );
    match &result.best {
        Some(best) => eprintln!("Best: {:.4} {:?}", best.metric_value, best.params),
        None => eprintln!("Best: none"),
    }
    eprintln!("{}", "=".repeat(80));
}

fn print_walk_forward(result: &WalkForwardResult) {
    eprintln!("\n{}", "=".repeat(80));
    eprintln!("Walk-forward: {} windows, metric {}", result.windows.len(), result.metric);
    eprintln!("{}", "-".repeat(80));
    eprintln!("{:>4} {:>12} {:>12} {:>10}  Params", "Win", "IS", "OOS", "Degr%");
    for w in &result.windows {
        eprintln!(
            "{:>4} {:>12.4} {:>12.4} {:>10.1}  {:?}",
            w.split.index,
            w.in_sample_metric,
            w.out_of_sample_metric,
            w.degradation_pct,
            w.best_params
        );
    }
    eprintln!("{}", "-".repeat(80));
    eprintln!(
        "OOS return {:.2}% | trades {} | avg Sharpe {:.2} | max DD {:.2}% | robustness {:.1}",
        result.total_return_pct,
        result.total_trades,
        result.average_sharpe,
        result.max_drawdown_pct,
        result.robustness_score
    );
    eprintln!("{}", "=".repeat(80));
}

fn print_monte_carlo(name: &str, mc: &MonteCarloResult) {
    eprintln!("\n{}", "=".repeat(80));
    eprintln!("Monte Carlo: {name}, {} simulations of {} trades", mc.simulations, mc.trade_count);
    eprintln!("{}", "-".repeat(80));
    eprintln!("{:<18} {:>9} {:>9} {:>9} {:>9} {:>9}", "", "p5", "p25", "p50", "p75", "p95");
    for (label, p) in [
        ("Return %", &mc.total_return_pct),
        ("Max drawdown %", &mc.max_drawdown_pct),
        ("Final equity", &mc.final_equity),
        ("Sharpe", &mc.sharpe),
    ] {
        eprintln!(
            "{:<18} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
            label, p.p5, p.p25, p.p50, p.p75, p.p95
        );
    }
    eprintln!("{}", "-".repeat(80));
    eprintln!(
        "Risk of ruin {:.2}% | P(profit) {:.1}%",
        mc.risk_of_ruin, mc.probability_of_profit
    );
    eprintln!("{}", "=".repeat(80));
}
