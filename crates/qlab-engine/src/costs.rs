use qlab_core::{BacktestConfig, Direction};
use serde::Serialize;

/// Result of a simulated signal fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulatedFill {
    pub fill_price: f64,
    /// Price distance between the quoted and filled price, always >= 0.
    pub slippage: f64,
}

/// Execution-cost model: fixed pip slippage plus proportional commission.
///
/// Slippage model:
///   - `slippage_pips × pip_size` price units per fill
///   - buys fill higher, sells fill lower
///   - stop-loss and take-profit exits fill at their exact level
///
/// Commission model:
///   `commission = notional × rate`, charged on entry and again on exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    slippage: f64,
    commission_rate: f64,
}

impl CostModel {
    pub fn new(slippage_pips: f64, pip_size: f64, commission_rate: f64) -> Self {
        Self {
            slippage: slippage_pips * pip_size,
            commission_rate,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            slippage: config.slippage_price(),
            commission_rate: config.commission,
        }
    }

    /// Fill a market order at `price`. `side` is the side of the order
    /// itself: `Long` buys, `Short` sells.
    #[inline]
    pub fn market_fill(&self, price: f64, side: Direction) -> SimulatedFill {
        SimulatedFill {
            fill_price: price + side.sign() * self.slippage,
            slippage: self.slippage,
        }
    }

    #[inline]
    pub fn commission(&self, notional: f64) -> f64 {
        notional * self.commission_rate
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::from_config(&BacktestConfig::default())
    }
}
