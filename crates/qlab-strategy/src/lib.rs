pub mod bollinger_reversion;
pub mod breakout;
pub mod indicators;
pub mod macd_momentum;
pub mod registry;
pub mod rsi_reversion;
pub mod sma_crossover;
pub mod traits;

pub use bollinger_reversion::BollingerReversion;
pub use breakout::Breakout;
pub use macd_momentum::MacdMomentum;
pub use registry::{create_strategy, default_params, STRATEGY_NAMES};
pub use rsi_reversion::RsiReversion;
pub use sma_crossover::SmaCrossover;
pub use traits::{History, Strategy, StrategyError, StrategyId};
