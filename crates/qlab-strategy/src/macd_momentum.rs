use qlab_core::{BacktestConfig, CandleStore, Direction, Params, Position, Signal};

use crate::indicators::{crossover, crossunder, macd};
use crate::traits::{invalid, History, ParamReader, Strategy, StrategyError, StrategyId};

const ID: StrategyId = "macd_momentum";
const PARAMS: &[&str] = &["fast_period", "slow_period", "signal_period", "allow_short"];

/// Trades MACD / signal-line crosses: long on a cross up, short (or flat) on a
/// cross down.
#[derive(Debug, Clone)]
pub struct MacdMomentum {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    allow_short: bool,
    macd: Vec<f64>,
    signal: Vec<f64>,
}

impl MacdMomentum {
    pub fn new(params: &Params) -> Result<Self, StrategyError> {
        let reader = ParamReader::new(ID, params, PARAMS)?;
        let fast_period = reader.period("fast_period", 12)?;
        let slow_period = reader.period("slow_period", 26)?;
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
            signal_period: reader.period("signal_period", 9)?,
            allow_short: reader.value("allow_short", 1.0)? != 0.0,
            macd: Vec::new(),
            signal: Vec::new(),
        })
    }
}

impl Default for MacdMomentum {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
            allow_short: true,
            macd: Vec::new(),
            signal: Vec::new(),
        }
    }
}

impl Strategy for MacdMomentum {
    fn id(&self) -> StrategyId {
        ID
    }

    fn params(&self) -> Params {
        qlab_core::params([
            ("fast_period", self.fast_period as f64),
            ("slow_period", self.slow_period as f64),
            ("signal_period", self.signal_period as f64),
            ("allow_short", if self.allow_short { 1.0 } else { 0.0 }),
        ])
    }

    fn init(
        &mut self,
        candles: &CandleStore,
        _config: &BacktestConfig,
    ) -> Result<(), StrategyError> {
        let m = macd(&candles.close, self.fast_period, self.slow_period, self.signal_period);
        self.macd = m.macd;
        self.signal = m.signal;
        Ok(())
    }

    fn on_candle(
        &mut self,
        index: usize,
        _history: History<'_>,
        position: Option<&Position>,
    ) -> Option<Signal> {
        // Only look at the series up to the current candle.
        let end = (index + 1).min(self.macd.len());
        let (line, signal) = (&self.macd[..end], &self.signal[..end]);
        let direction = position.map(|p| p.direction);

        if crossover(line, signal, index) && direction != Some(Direction::Long) {
            return Some(Signal::buy().with_reason("MACD cross up"));
        }
        if crossunder(line, signal, index) {
            return match direction {
                Some(Direction::Short) => None,
                _ if self.allow_short => Some(Signal::sell().with_reason("MACD cross down")),
                Some(Direction::Long) => Some(Signal::close().with_reason("MACD cross down")),
                None => None,
            };
        }
        None
    }

    fn clone_with(&self, params: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(Self::new(params)?))
    }
}
