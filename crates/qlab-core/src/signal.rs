use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
    Close,
}

impl SignalKind {
    /// Direction a buy/sell signal opens; `None` for close.
    pub fn direction(self) -> Option<Direction> {
        match self {
            SignalKind::Buy => Some(Direction::Long),
            SignalKind::Sell => Some(Direction::Short),
            SignalKind::Close => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    Reversal,
    EndOfBacktest,
}

impl ExitReason {
    pub fn label(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "Stop loss",
            ExitReason::TakeProfit => "Take profit",
            ExitReason::Signal => "Signal",
            ExitReason::Reversal => "Reversal",
            ExitReason::EndOfBacktest => "End of backtest",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Instruction emitted by a strategy for the current candle.
///
/// `size` is a notional amount in account currency; the engine caps it at
/// `equity × max_position_size × leverage`. `stop_loss` and `take_profit`
/// are absolute price levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Signal {
    pub fn buy() -> Self {
        Self::of(SignalKind::Buy)
    }

    pub fn sell() -> Self {
        Self::of(SignalKind::Sell)
    }

    pub fn close() -> Self {
        Self::of(SignalKind::Close)
    }

    fn of(kind: SignalKind) -> Self {
        Self {
            kind,
            size: None,
            stop_loss: None,
            take_profit: None,
            reason: None,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
