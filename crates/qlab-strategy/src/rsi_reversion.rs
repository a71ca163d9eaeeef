use qlab_core::{BacktestConfig, CandleStore, Direction, Params, Position, Signal};

use crate::indicators::rsi;
use crate::traits::{invalid, History, ParamReader, Strategy, StrategyError, StrategyId};

const ID: StrategyId = "rsi_reversion";
const PARAMS: &[&str] = &["period", "oversold", "overbought", "allow_short"];

/// RSI mean reversion.
///
/// Buys when RSI climbs back above `oversold` and exits the long once RSI
/// reaches `overbought`. The short side mirrors it.
#[derive(Debug, Clone)]
pub struct RsiReversion {
    period: usize,
    oversold: f64,
    overbought: f64,
    allow_short: bool,
    rsi: Vec<f64>,
}

impl RsiReversion {
    pub fn new(params: &Params) -> Result<Self, StrategyError> {
        let reader = ParamReader::new(ID, params, PARAMS)?;
        let oversold = reader.value("oversold", 30.0)?;
        let overbought = reader.value("overbought", 70.0)?;
        if !(0.0..=100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
            return Err(invalid("oversold", oversold, "levels must lie in 0..=100"));
        }
        if oversold >= overbought {
            return Err(invalid("oversold", oversold, "must be below overbought"));
        }

        Ok(Self {
            period: reader.period("period", 14)?,
            oversold,
            overbought,
            allow_short: reader.value("allow_short", 1.0)? != 0.0,
            rsi: Vec::new(),
        })
    }
}

impl Default for RsiReversion {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
            allow_short: true,
            rsi: Vec::new(),
        }
    }
}

impl Strategy for RsiReversion {
    fn id(&self) -> StrategyId {
        ID
    }

    fn params(&self) -> Params {
        qlab_core::params([
            ("period", self.period as f64),
            ("oversold", self.oversold),
            ("overbought", self.overbought),
            ("allow_short", if self.allow_short { 1.0 } else { 0.0 }),
        ])
    }

    fn init(
        &mut self,
        candles: &CandleStore,
        _config: &BacktestConfig,
    ) -> Result<(), StrategyError> {
        self.rsi = rsi(&candles.close, self.period);
        Ok(())
    }

    fn on_candle(
        &mut self,
        index: usize,
        _history: History<'_>,
        position: Option<&Position>,
    ) -> Option<Signal> {
        if index == 0 {
            return None;
        }
        let (prev, curr) = (*self.rsi.get(index - 1)?, *self.rsi.get(index)?);
        if prev.is_nan() || curr.is_nan() {
            return None;
        }

        match position.map(|p| p.direction) {
            Some(Direction::Long) if curr >= self.overbought => {
                Some(Signal::close().with_reason("RSI overbought"))
            }
            Some(Direction::Short) if curr <= self.oversold => {
                Some(Signal::close().with_reason("RSI oversold"))
            }
            None if prev <= self.oversold && curr > self.oversold => {
                Some(Signal::buy().with_reason("RSI left oversold"))
            }
            None if self.allow_short && prev >= self.overbought && curr < self.overbought => {
                Some(Signal::sell().with_reason("RSI left overbought"))
            }
            _ => None,
        }
    }

    fn clone_with(&self, params: &Params) -> Result<Box<dyn Strategy>, StrategyError> {
        Ok(Box::new(Self::new(params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlab_core::{params, SignalKind};

    #[test]
    fn test_level_validation() {
        assert!(RsiReversion::new(&params([("oversold", 80.0)])).is_err());
        assert!(RsiReversion::new(&params([("overbought", 120.0)])).is_err());
        assert!(RsiReversion::new(&params([("period", 7.0), ("oversold", 20.0)])).is_ok());
    }

    #[test]
    fn test_buys_on_exit_from_oversold() {
        let mut s = RsiReversion::default();
        s.rsi = vec![f64::NAN, 25.0, 35.0, 75.0];
        let candles: CandleStore = CandleStore::new();
        let h = History::new(&candles, 0);

        assert!(s.on_candle(1, h, None).is_none());
        let buy = s.on_candle(2, h, None).unwrap();
        assert_eq!(buy.kind, SignalKind::Buy);

        let long = Position {
            id: 1,
            direction: Direction::Long,
            entry_time: 0,
            entry_price: 1.0,
            size: 1.0,
            quantity: 1.0,
            entry_commission: 0.0,
            stop_loss: None,
            take_profit: None,
        };
        let close = s.on_candle(3, h, Some(&long)).unwrap();
        assert_eq!(close.kind, SignalKind::Close);
    }

    #[test]
    fn test_short_side_respects_flag() {
        let mut s = RsiReversion::new(&params([("allow_short", 0.0)])).unwrap();
        s.rsi = vec![75.0, 65.0];
        let candles = CandleStore::new();
        assert!(s.on_candle(1, History::new(&candles, 0), None).is_none());

        let mut s = RsiReversion::default();
        s.rsi = vec![75.0, 65.0];
        let sell = s.on_candle(1, History::new(&candles, 0), None).unwrap();
        assert_eq!(sell.kind, SignalKind::Sell);
    }
}
