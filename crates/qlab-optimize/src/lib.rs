pub mod control;
pub mod error;
pub mod genetic;
pub mod grid;
pub mod monte_carlo;
pub mod parallel;
pub mod walk_forward;

pub use control::{CancelToken, GenerationProgress, Progress};
pub use error::OptimizeError;
pub use genetic::{GeneticOptimizer, GeneticResult};
pub use grid::{Combinations, GridSearchOptimizer, OptimizationResult, OptimizationRun};
pub use monte_carlo::{
    ConfidenceInterval, MonteCarloResult, MonteCarloSimulator, Percentiles, SimulationStats,
};
pub use parallel::{ComparisonResult, ComparisonRunner};
pub use walk_forward::{WalkForwardAnalyzer, WalkForwardResult, WalkForwardWindow};
