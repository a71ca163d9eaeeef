pub mod costs;
pub mod engine;
pub mod metrics;

pub use costs::{CostModel, SimulatedFill};
pub use engine::{BacktestEngine, BacktestResult, EngineError};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
