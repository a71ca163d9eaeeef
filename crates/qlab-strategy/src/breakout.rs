use qlab_core::{BacktestConfig, CandleStore, Direction, Params, Position, Signal};

use crate::indicators::{atr, highest, lowest};
use crate::traits::{History, ParamReader, Strategy, StrategyError, StrategyId};

const ID: StrategyId = "breakout";
const PARAMS: &[&str] = &["lookback", "atr_period", "atr_stop_mult", "allow_short"];

/// Channel breakout: enters when the close clears the previous `lookback`
/// candles' high (long) or low (short).
///
/// The channel is taken from the candle before the current one, so the
/// current bar never defines its own breakout level. Opposite breakouts
/// reverse the position.
#[derive(Debug, Clone)]
pub struct Breakout {
    lookback: usize,
    atr_period: usize,
    atr_stop_mult: f64,
    allow_short: bool,
    upper: Vec<f64>,
    lower: Vec<f64>,
    atr: Vec<f64>,
}

impl Breakout {
    pub fn new(params: &Params) -> Result<Self, StrategyError> {
        let reader = ParamReader::new(ID, params, PARAMS)?;
        Ok(Self {
            lookback: reader.period("lookback", 20)?,
            atr_period: reader.period("atr_period", 14)?,
            atr_stop_mult: reader.non_negative("atr_stop_mult", 1.5)?,
            allow_short: reader.value("allow_short", 1.0)? != 0.0,
            ..Self::default()
        })
    }

    fn entry(&self, direction: Direction, price: f64, index: usize) -> Signal {
        let mut signal = match direction {
            Direction::Long => Signal::buy().with_reason("Channel breakout up"),
            Direction::Short => Signal::sell().with_reason("Channel breakout down"),
        };
        let atr = self.atr.get(index).copied().unwrap_or(f64::NAN);
        if self.atr_stop_mult > 0.0 && atr.is_finite() {
            signal = signal.with_stop_loss(price - direction.sign() * self.atr_stop_mult * atr);
        }
        signal
    }
}

impl Default for Breakout {
    fn default() -> Self {
        Self {
            lookback: 20,
            atr_period: 14,
            atr_stop_mult: 1.5,
            allow_short: true,
            upper: Vec::new(),
            lower: Vec::new(),
            atr: Vec::new(),
        }
    }
}

impl Strategy for Breakout {
    fn id(&self) -> StrategyId {
        ID
    }

    fn params(&self) -> Params {
        qlab_core::params([
            ("lookback", self.lookback as f64),
            ("atr_period", self.atr_period as f64),
            ("atr_stop_mult", self.atr_stop_mult),
            ("allow_short", if self.allow_short { 1.0 } else { 0.0 }),
        ])
    }

    fn init(
        &mut self,
        candles: &CandleStore,
        _config: &BacktestConfig,
    ) -> Result<(), StrategyError> {
        self.upper = highest(&candles.high, self.lookback);
        self.lower = lowest(&candles.low, self.lookback);
        self.atr = atr(&candles.high, &candles.low, &candles.close, self.atr_period);
        Ok(())
    }

    fn on_candle(
        &mut self,
        index: usize,
        history: History<'_>,
        position: Option<&Position>,
    ) -> Option<Signal> {
        let prev = index.checked_sub(1)?;
        let (upper, lower) = (*self.upper.get(prev)?, *self.lower.get(prev)?);
        if upper.is_nan() || lower.is_nan() {
            return None;
        }
        let close = history.current()?.close;
        let direction = position.map(|p| p.direction);

        if close > upper && direction != Some(Direction::Long) {
            return Some(self.entry(Direction::Long, close, index));
        }
        if close < lower && direction != Some(Direction::Short) {
            if self.allow_short {
                return Some(self.entry(Direction::Short, close, index));
            }
            if direction == Some(Direction::Long) {
                return Some(Signal::close().with_reason("Channel breakdown"));
            }
        }
        None
    }

    fn clone_with(&self, params: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(Self::new(params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlab_core::{params, SignalKind};

    fn flat_then(last: f64) -> CandleStore {
        let mut store = CandleStore::new();
        for i in 0..10 {
            store.push(60_000 * (i + 1), 100.0, 101.0, 99.0, 100.0, 1.0);
        }
        store.push(60_000 * 11, 100.0, last.max(101.0), last.min(99.0), last, 1.0);
        store
    }

    #[test]
    fn test_breaks_out_above_previous_channel() {
        let candles = flat_then(105.0);
        let mut s = Breakout::new(&params([("lookback", 5.0), ("atr_period", 3.0)])).unwrap();
        s.init(&candles, &BacktestConfig::default()).unwrap();

        assert!(s.on_candle(9, History::new(&candles, 9), None).is_none());
        let signal = s.on_candle(10, History::new(&candles, 10), None).unwrap();
        assert_eq!(signal.kind, SignalKind::Buy);
        assert!(signal.stop_loss.unwrap() < 105.0);
    }

    #[test]
    fn test_breakdown_closes_long_when_shorts_disabled() {
        let candles = flat_then(95.0);
        let mut s = Breakout::new(&params([("lookback", 5.0), ("allow_short", 0.0)])).unwrap();
        s.init(&candles, &BacktestConfig::default()).unwrap();

        let long = Position {
            id: 1,
            direction: Direction::Long,
            entry_time: 0,
            entry_price: 100.0,
            size: 1.0,
            quantity: 0.01,
            entry_commission: 0.0,
            stop_loss: None,
            take_profit: None,
        };
        let h = History::new(&candles, 10);
        assert_eq!(s.on_candle(10, h, Some(&long)).unwrap().kind, SignalKind::Close);
        assert!(s.on_candle(10, h, None).is_none());
    }

    #[test]
    fn test_first_candle_is_quiet() {
        let candles = flat_then(105.0);
        let mut s = Breakout::new(&params([("lookback", 1.0)])).unwrap();
        s.init(&candles, &BacktestConfig::default()).unwrap();
        assert!(s.on_candle(0, History::new(&candles, 0), None).is_none());
    }
}
