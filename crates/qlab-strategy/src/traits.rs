use qlab_core::{BacktestConfig, Candle, CandleStore, Params, Position, Signal, Trade};
use thiserror::Error;

/// Unique strategy identifier.
pub type StrategyId = &'static str;

/// Stateful per-run trading strategy driven by the backtest engine.
///
/// Lifecycle for one run:
/// 1. [`init`](Strategy::init) once, with the full candle store. Indicator
///    series are precomputed here.
/// 2. [`on_candle`](Strategy::on_candle) once per candle, in strictly
///    increasing index order.
/// 3. [`on_complete`](Strategy::on_complete) once after the last candle.
///
/// Precomputed series physically contain values past the current index.
/// Implementations must only index them up to the `index` passed to
/// `on_candle`.
///
/// Strategies must be `Send` so independent instances can be moved to worker
/// threads; an instance is never shared between runs.
pub trait Strategy: Send {
    fn id(&self) -> StrategyId;

    /// Current parameter values, including defaults that were not overridden.
    fn params(&self) -> Params;

    fn init(&mut self, candles: &CandleStore, config: &BacktestConfig) -> Result<(), StrategyError>;

    fn on_candle(
        &mut self,
        index: usize,
        history: History<'_>,
        position: Option<&Position>,
    ) -> Option<Signal>;

    fn on_complete(&mut self, _trades: &[Trade]) {}

    /// Fresh instance with the same logic and new parameters.
    ///
    /// Parameters missing from `params` keep the built-in defaults. The
    /// returned instance shares no state with `self`.
    fn clone_with(&self, params: &Params) -> Result<Box<dyn Strategy>, StrategyError>;
}

/// Read-only view over candles `0..=index`.
///
/// Column accessors return slices truncated at the current candle.
#[derive(Debug, Clone, Copy)]
pub struct History<'a> {
    store: &'a CandleStore,
    len: usize,
}

impl<'a> History<'a> {
    /// View of `store` up to and including `index`.
    pub fn new(store: &'a CandleStore, index: usize) -> Self {
        Self {
            store,
            len: (index + 1).min(store.len()),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current (most recent) candle.
    pub fn current(&self) -> Option<Candle> {
        self.len.checked_sub(1).map(|i| self.store.get(i))
    }

    pub fn get(&self, i: usize) -> Option<Candle> {
        (i < self.len).then(|| self.store.get(i))
    }

    pub fn timestamps(&self) -> &'a [i64] {
        &self.store.timestamps[..self.len]
    }

    pub fn open(&self) -> &'a [f64] {
        &self.store.open[..self.len]
    }

    pub fn high(&self) -> &'a [f64] {
        &self.store.high[..self.len]
    }

    pub fn low(&self) -> &'a [f64] {
        &self.store.low[..self.len]
    }

    pub fn close(&self) -> &'a [f64] {
        &self.store.close[..self.len]
    }

    pub fn volume(&self) -> &'a [f64] {
        &self.store.volume[..self.len]
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("unknown parameter '{name}' for strategy {strategy}")]
    UnknownParam { strategy: StrategyId, name: String },
    #[error("invalid parameter '{name}' = {value}: {reason}")]
    InvalidParam {
        name: String,
        value: f64,
        reason: String,
    },
}

/// Validated access to a strategy's [`Params`] with per-name defaults.
pub(crate) struct ParamReader<'a> {
    params: &'a Params,
}

impl<'a> ParamReader<'a> {
    /// Rejects any key not listed in `known`.
    pub(crate) fn new(
        strategy: StrategyId,
        params: &'a Params,
        known: &[&str],
    ) -> Result<Self, StrategyError> {
        if let Some(name) = params.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(StrategyError::UnknownParam {
                strategy,
                name: name.clone(),
            });
        }
        Ok(Self { params })
    }

    pub(crate) fn value(&self, name: &str, default: f64) -> Result<f64, StrategyError> {
        let value = self.params.get(name).copied().unwrap_or(default);
        if !value.is_finite() {
            return Err(invalid(name, value, "must be finite"));
        }
        Ok(value)
    }

    /// A lookback period: rounded to the nearest integer, at least 1.
    pub(crate) fn period(&self, name: &str, default: usize) -> Result<usize, StrategyError> {
        let value = self.value(name, default as f64)?;
        let rounded = value.round();
        if rounded < 1.0 {
            return Err(invalid(name, value, "period must be >= 1"));
        }
        Ok(rounded as usize)
    }

    /// A non-negative value (0 disables the feature it controls).
    pub(crate) fn non_negative(&self, name: &str, default: f64) -> Result<f64, StrategyError> {
        let value = self.value(name, default)?;
        if value < 0.0 {
            return Err(invalid(name, value, "must be >= 0"));
        }
        Ok(value)
    }
}

pub(crate) fn invalid(name: &str, value: f64, reason: &str) -> StrategyError {
    StrategyError::InvalidParam {
        name: name.to_string(),
        value,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlab_core::params;

    fn store(n: usize) -> CandleStore {
        let mut s = CandleStore::with_capacity(n);
        for i in 0..n {
            let p = 100.0 + i as f64;
            s.push(1_000 + i as i64 * 60_000, p, p + 1.0, p - 1.0, p + 0.5, 10.0);
        }
        s
    }

    #[test]
    fn test_history_truncates_columns() {
        let s = store(10);
        let h = History::new(&s, 3);
        assert_eq!(h.len(), 4);
        assert_eq!(h.close().len(), 4);
        assert_eq!(h.current().unwrap().close, s.close[3]);
        assert!(h.get(4).is_none());
        assert_eq!(History::new(&s, 99).len(), 10);
    }

    #[test]
    fn test_param_reader_defaults_and_validation() {
        let p = params([("period", 14.6)]);
        let reader = ParamReader::new("test", &p, &["period", "level"]).unwrap();
        assert_eq!(reader.period("period", 10).unwrap(), 15);
        assert_eq!(reader.value("level", 30.0).unwrap(), 30.0);

        let zero = params([("period", 0.2)]);
        let reader = ParamReader::new("test", &zero, &["period"]).unwrap();
        assert!(reader.period("period", 10).is_err());

        let unknown = params([("bogus", 1.0)]);
        assert!(matches!(
            ParamReader::new("test", &unknown, &["period"]),
            Err(StrategyError::UnknownParam { .. })
        ));
    }
}
