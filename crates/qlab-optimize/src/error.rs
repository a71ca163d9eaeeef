use qlab_engine::EngineError;
use qlab_strategy::StrategyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("no parameter ranges to optimize")]
    EmptyParamRanges,
    #[error("cannot optimize on an empty candle store")]
    EmptyCandles,
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("optimization cancelled")]
    Cancelled,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}
