use qlab_core::{BacktestConfig, CandleStore, Direction, Params, Position, Signal};

use crate::indicators::sma;
use crate::traits::{invalid, History, ParamReader, Strategy, StrategyError, StrategyId};

const ID: StrategyId = "sma_crossover";
const PARAMS: &[&str] = &[
    "fast_period",
    "slow_period",
    "stop_loss_pct",
    "take_profit_pct",
    "allow_short",
];

/// Moving-average regime strategy.
///
/// Holds a long position while SMA(fast) is above SMA(slow) and a short one
/// (if enabled) while it is below. A flat strategy enters on the first candle
/// where both averages are defined, then reverses on each cross. Optional
/// percentage stop-loss / take-profit levels are attached to every entry.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    allow_short: bool,
    fast: Vec<f64>,
    slow: Vec<f64>,
}

impl SmaCrossover {
    pub fn new(params: &Params) -> Result<Self, StrategyError> {
        let reader = ParamReader::new(ID, params, PARAMS)?;
        let fast_period = reader.period("fast_period", 5)?;
        let slow_period = reader.period("slow_period", 20)?;
        if fast_period >= slow_period {
            return Err(invalid(
                "fast_period",
                fast_period as f64,
                "must be smaller than slow_period",
            ));
        }

        Ok(Self {
            fast_period,
            slow_period,
            stop_loss_pct: reader.non_negative("stop_loss_pct", 0.0)?,
            take_profit_pct: reader.non_negative("take_profit_pct", 0.0)?,
            allow_short: reader.value("allow_short", 1.0)? != 0.0,
            fast: Vec::new(),
            slow: Vec::new(),
        })
    }

    fn entry(&self, direction: Direction, price: f64) -> Signal {
        let sign = direction.sign();
        let mut signal = match direction {
            Direction::Long => Signal::buy(),
            Direction::Short => Signal::sell(),
        };
        if self.stop_loss_pct > 0.0 {
            signal = signal.with_stop_loss(price * (1.0 - sign * self.stop_loss_pct / 100.0));
        }
        if self.take_profit_pct > 0.0 {
            signal = signal.with_take_profit(price * (1.0 + sign * self.take_profit_pct / 100.0));
        }
        signal
    }
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self {
            fast_period: 5,
            slow_period: 20,
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
            allow_short: true,
            fast: Vec::new(),
            slow: Vec::new(),
        }
    }
}

impl Strategy for SmaCrossover {
    fn id(&self) -> StrategyId {
        ID
    }

    fn params(&self) -> Params {
        qlab_core::params([
            ("fast_period", self.fast_period as f64),
            ("slow_period", self.slow_period as f64),
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("allow_short", if self.allow_short { 1.0 } else { 0.0 }),
        ])
    }

    fn init(
        &mut self,
        candles: &CandleStore,
        _config: &BacktestConfig,
    ) -> Result<(), StrategyError> {
        self.fast = sma(&candles.close, self.fast_period);
        self.slow = sma(&candles.close, self.slow_period);
        Ok(())
    }

    fn on_candle(
        &mut self,
        index: usize,
        history: History<'_>,
        position: Option<&Position>,
    ) -> Option<Signal> {
        let (fast, slow) = (*self.fast.get(index)?, *self.slow.get(index)?);
        if fast.is_nan() || slow.is_nan() || fast == slow {
            return None;
        }
        let price = history.current()?.close;

        let desired = if fast > slow {
            Direction::Long
        } else {
            Direction::Short
        };

        match position {
            Some(pos) if pos.direction == desired => None,
            Some(_) if desired == Direction::Short && !self.allow_short => {
                Some(Signal::close().with_reason("SMA cross down"))
            }
            _ if desired == Direction::Short && !self.allow_short => None,
            _ => Some(self.entry(desired, price).with_reason(match desired {
                Direction::Long => "SMA fast above slow",
                Direction::Short => "SMA fast below slow",
            })),
        }
    }

    fn clone_with(&self, params: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(Self::new(params)?))
    }
}
