use qlab_core::Params;

use crate::bollinger_reversion::BollingerReversion;
use crate::breakout::Breakout;
use crate::macd_momentum::MacdMomentum;
use crate::rsi_reversion::RsiReversion;
use crate::sma_crossover::SmaCrossover;
use crate::traits::{Strategy, StrategyError};

/// Names accepted by [`create_strategy`].
pub const STRATEGY_NAMES: &[&str] = &[
    "sma_crossover",
    "rsi_reversion",
    "macd_momentum",
    "bollinger_reversion",
    "breakout",
];

/// Build a built-in strategy by name. Parameters not present in `params`
/// keep their defaults.
pub fn create_strategy(name: &str, params: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
    let strategy: Box<dyn Strategy> = match name {
        "sma_crossover" => Box::new(SmaCrossover::new(params)?),
        "rsi_reversion" => Box::new(RsiReversion::new(params)?),
        "macd_momentum" => Box::new(MacdMomentum::new(params)?),
        "bollinger_reversion" => Box::new(BollingerReversion::new(params)?),
        "breakout" => Box::new(Breakout::new(params)?),
        other => return Err(StrategyError::UnknownStrategy(other.to_string())),
    };
    Ok(strategy)
}

/// Full default parameter set of a built-in strategy.
pub fn default_params(name: &str) -> Result<Params, StrategyError> {
    create_strategy(name, &Params::new()).map(|s| s.params())
}
