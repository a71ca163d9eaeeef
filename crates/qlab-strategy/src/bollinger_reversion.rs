use qlab_core::{BacktestConfig, CandleStore, Direction, Params, Position, Signal};

use crate::indicators::{atr, bollinger_bands};
use crate::traits::{History, ParamReader, Strategy, StrategyError, StrategyId};

const ID: StrategyId = "bollinger_reversion";
const PARAMS: &[&str] = &["period", "std_dev", "atr_period", "atr_stop_mult"];

/// Fades closes outside the Bollinger Bands and exits at the middle band.
///
/// Entries carry an ATR-based protective stop unless `atr_stop_mult` is 0.
#[derive(Debug, Clone)]
pub struct BollingerReversion {
    period: usize,
    std_dev: f64,
    atr_period: usize,
    atr_stop_mult: f64,
    upper: Vec<f64>,
    middle: Vec<f64>,
    lower: Vec<f64>,
    atr: Vec<f64>,
}

impl BollingerReversion {
    pub fn new(params: &Params) -> Result<Self, StrategyError> {
        let reader = ParamReader::new(ID, params, PARAMS)?;
        Ok(Self {
            period: reader.period("period", 20)?,
            std_dev: reader.non_negative("std_dev", 2.0)?,
            atr_period: reader.period("atr_period", 14)?,
            atr_stop_mult: reader.non_negative("atr_stop_mult", 2.0)?,
            ..Self::default()
        })
    }

    fn stop_for(&self, direction: Direction, price: f64, index: usize) -> Option<f64> {
        let atr = *self.atr.get(index)?;
        if self.atr_stop_mult == 0.0 || atr.is_nan() {
            return None;
        }
        Some(price - direction.sign() * self.atr_stop_mult * atr)
    }
}

impl Default for BollingerReversion {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev: 2.0,
            atr_period: 14,
            atr_stop_mult: 2.0,
            upper: Vec::new(),
            middle: Vec::new(),
            lower: Vec::new(),
            atr: Vec::new(),
        }
    }
}

impl Strategy for BollingerReversion {
    fn id(&self) -> StrategyId {
        ID
    }

    fn params(&self) -> Params {
        qlab_core::params([
            ("period", self.period as f64),
            ("std_dev", self.std_dev),
            ("atr_period", self.atr_period as f64),
            ("atr_stop_mult", self.atr_stop_mult),
        ])
    }

    fn init(
        &mut self,
        candles: &CandleStore,
        _config: &BacktestConfig,
    ) -> Result<(), StrategyError> {
        let bands = bollinger_bands(&candles.close, self.period, self.std_dev);
        self.upper = bands.upper;
        self.middle = bands.middle;
        self.lower = bands.lower;
        self.atr = atr(&candles.high, &candles.low, &candles.close, self.atr_period);
        Ok(())
    }

    fn on_candle(
        &mut self,
        index: usize,
        history: History<'_>,
        position: Option<&Position>,
    ) -> Option<Signal> {
        let close = history.current()?.close;
        let (upper, middle, lower) = (
            *self.upper.get(index)?,
            *self.middle.get(index)?,
            *self.lower.get(index)?,
        );
        if middle.is_nan() {
            return None;
        }

        match position.map(|p| p.direction) {
            Some(Direction::Long) if close >= middle => {
                Some(Signal::close().with_reason("Back to middle band"))
            }
            Some(Direction::Short) if close <= middle => {
                Some(Signal::close().with_reason("Back to middle band"))
            }
            None if close < lower => {
                let mut signal = Signal::buy().with_reason("Close below lower band");
                signal.stop_loss = self.stop_for(Direction::Long, close, index);
                Some(signal)
            }
            None if close > upper => {
                let mut signal = Signal::sell().with_reason("Close above upper band");
                signal.stop_loss = self.stop_for(Direction::Short, close, index);
                Some(signal)
            }
            _ => None,
        }
    }

    fn clone_with(&self, params: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(Self::new(params)?))
    }
}
