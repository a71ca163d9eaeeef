use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use qlab_core::{BacktestConfig, CandleStore, GeneticConfig, OptimizationConfig, ParamRange, Params};
use qlab_engine::BacktestEngine;
use qlab_strategy::{Strategy, StrategyError};

use crate::control::{CancelToken, GenerationProgress};
use crate::error::OptimizeError;
use crate::grid::{compare_values, evaluate, select_best, sort_runs, OptimizationRun};

#[derive(Debug, Clone)]
struct Individual {
    params: Params,
    /// `None` until evaluated. Elites keep theirs across generations.
    fitness: Option<f64>,
}

impl Individual {
    fn fitness(&self) -> f64 {
        self.fitness.unwrap_or(f64::NEG_INFINITY)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneticResult {
    pub best: Option<OptimizationRun>,
    /// Unique evaluated parameter sets, best first.
    pub results: Vec<OptimizationRun>,
    pub generations_run: usize,
    pub evaluations: usize,
    /// Best fitness of each generation.
    pub fitness_history: Vec<f64>,
}

/// Evolutionary search over the same parameter grid as
/// [`GridSearchOptimizer`](crate::GridSearchOptimizer).
///
/// Each generation:
///   1. Evaluates individuals without a fitness
///   2. Carries the top `elite_count` over unchanged
///   3. Fills the remaining slots from tournament-selected parents via
///      uniform crossover and single-gene mutation
///
/// Stops after `generations`, or earlier once the best-ever fitness has not
/// improved for `stagnation_limit` generations. All randomness comes from a
/// `StdRng` seeded with `seed`.
pub struct GeneticOptimizer {
    backtest: BacktestConfig,
    optimization: OptimizationConfig,
    config: GeneticConfig,
    cancel: CancelToken,
}

impl GeneticOptimizer {
    pub fn new(
        backtest: BacktestConfig,
        optimization: OptimizationConfig,
        config: GeneticConfig,
    ) -> Self {
        Self {
            backtest,
            optimization,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn optimize<F, P>(
        &self,
        candles: &CandleStore,
        factory: F,
        mut on_progress: P,
    ) -> Result<GeneticResult, OptimizeError>
    where
        F: Fn(&Params) -> Result<Box<dyn Strategy>, StrategyError>,
        P: FnMut(GenerationProgress),
    {
        if self.optimization.param_ranges.is_empty() {
            return Err(OptimizeError::EmptyParamRanges);
        }
        if candles.is_empty() {
            return Err(OptimizeError::EmptyCandles);
        }
        let cfg = &self.config;
        if cfg.population_size == 0 {
            return Err(OptimizeError::InvalidConfig(
                "population_size must be at least 1".into(),
            ));
        }

        let metric = self.optimization.metric;
        let maximize = self.optimization.maximize;
        let genes: Vec<(&String, &ParamRange)> = self.optimization.param_ranges.iter().collect();
        let elite_count = cfg.elite_count.min(cfg.population_size);
        let tournament_size = cfg.tournament_size.max(1);

        info!(
            population = cfg.population_size,
            generations = cfg.generations,
            %metric,
            maximize,
            seed = cfg.seed,
            "genetic search started"
        );

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut engine = BacktestEngine::new(self.backtest.clone());
        let mut ledger: Vec<OptimizationRun> = Vec::new();
        let mut fitness_history = Vec::new();
        let mut evaluations = 0usize;
        let mut best_ever = f64::NEG_INFINITY;
        let mut stagnant = 0usize;
        let mut generations_run = 0usize;

        let mut population: Vec<Individual> = (0..cfg.population_size)
            .map(|_| Individual {
                params: random_params(&genes, &mut rng),
                fitness: None,
            })
            .collect();

        for generation in 0..cfg.generations {
            for individual in population.iter_mut().filter(|i| i.fitness.is_none()) {
                self.cancel.check()?;
                let run = evaluate(
                    &mut engine,
                    candles,
                    &factory,
                    individual.params.clone(),
                    metric,
                    maximize,
                );
                individual.fitness = Some(fitness_of(&run, maximize));
                evaluations += 1;
                if !ledger.iter().any(|r| r.params == run.params) {
                    ledger.push(run);
                }
            }

            population.sort_by(|a, b| compare_values(a.fitness(), b.fitness(), true));
            let generation_best = population[0].fitness();
            fitness_history.push(generation_best);
            generations_run = generation + 1;
            on_progress(GenerationProgress {
                generation,
                best_fitness: generation_best,
                evaluations,
            });
            debug!(generation, best_fitness = generation_best, evaluations, "generation done");

            if generation_best > best_ever {
                best_ever = generation_best;
                stagnant = 0;
            } else {
                stagnant += 1;
                if cfg.stagnation_limit > 0 && stagnant >= cfg.stagnation_limit {
                    info!(generation, "stopping early: no improvement");
                    break;
                }
            }
            if generation + 1 == cfg.generations {
                break;
            }

            let mut next: Vec<Individual> = population[..elite_count].to_vec();
            while next.len() < cfg.population_size {
                let parent1 = tournament(&population, tournament_size, &mut rng);
                let parent2 = tournament(&population, tournament_size, &mut rng);

                let mut child = parent1.params.clone();
                if rng.gen::<f64>() < cfg.crossover_rate {
                    for (name, value) in child.iter_mut() {
                        if rng.gen_bool(0.5) {
                            if let Some(&other) = parent2.params.get(name) {
                                *value = other;
                            }
                        }
                    }
                }
                if rng.gen::<f64>() < cfg.mutation_rate {
                    let (name, range) = genes[rng.gen_range(0..genes.len())];
                    child.insert(name.clone(), random_value(range, &mut rng));
                }
                next.push(Individual {
                    params: child,
                    fitness: None,
                });
            }
            population = next;
        }

        let best = select_best(&ledger, maximize)
            .or_else(|| {
                // Only non-finite candidates left; take the best that did not fail.
                ledger
                    .iter()
                    .filter(|r| r.error.is_none() && !r.metric_value.is_nan())
                    .min_by(|a, b| compare_values(a.metric_value, b.metric_value, maximize))
            })
            .cloned();
        sort_runs(&mut ledger, maximize);

        info!(
            generations_run,
            evaluations,
            best = ?best.as_ref().map(|b| b.metric_value),
            "genetic search finished"
        );

        Ok(GeneticResult {
            best,
            results: ledger,
            generations_run,
            evaluations,
            fitness_history,
        })
    }
}

/// Fitness is always maximized: metric values are negated when minimizing.
fn fitness_of(run: &OptimizationRun, maximize: bool) -> f64 {
    if run.error.is_some() || run.metric_value.is_nan() {
        return f64::NEG_INFINITY;
    }
    if maximize {
        run.metric_value
    } else {
        -run.metric_value
    }
}

fn random_value(range: &ParamRange, rng: &mut StdRng) -> f64 {
    range.value_at(rng.gen_range(0..range.count()))
}

fn random_params(genes: &[(&String, &ParamRange)], rng: &mut StdRng) -> Params {
    genes
        .iter()
        .map(|(name, range)| ((*name).clone(), random_value(range, rng)))
        .collect()
}

/// Best of `size` individuals drawn with replacement.
fn tournament<'a>(population: &'a [Individual], size: usize, rng: &mut StdRng) -> &'a Individual {
    let mut winner = &population[rng.gen_range(0..population.len())];
    for _ in 1..size {
        let challenger = &population[rng.gen_range(0..population.len())];
        if challenger.fitness() > winner.fitness() {
            winner = challenger;
        }
    }
    winner
}
