pub mod candle;
pub mod config;
pub mod metric;
pub mod params;
pub mod signal;
pub mod trade;
pub mod window;

pub use candle::{Candle, CandleError, CandleStore};
pub use config::{
    AppConfig, BacktestConfig, ConfigError, GeneticConfig, MonteCarloConfig, OptimizationConfig,
    StrategySection, WalkForwardConfig, WalkForwardSection, WindowType,
};
pub use metric::Metric;
pub use params::{params, total_combinations, ParamRange, Params};
pub use signal::{Direction, ExitReason, Signal, SignalKind};
pub use trade::{EquityPoint, Position, Trade};
pub use window::{compute_splits, WindowSplit};
