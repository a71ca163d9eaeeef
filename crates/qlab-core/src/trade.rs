use serde::{Deserialize, Serialize};

use crate::signal::{Direction, ExitReason};

/// An open position. Owned by the engine for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub direction: Direction,
    pub entry_time: i64,
    pub entry_price: f64,
    /// Notional committed at entry, in account currency.
    pub size: f64,
    /// Units held: `size / entry_price`.
    pub quantity: f64,
    pub entry_commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Position {
    /// Gross P&L if the position were closed at `price`.
    #[inline]
    pub fn gross_pnl_at(&self, price: f64) -> f64 {
        self.quantity * (price - self.entry_price) * self.direction.sign()
    }

    /// Unrealized P&L at `price`, net of the commission already paid at entry.
    #[inline]
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.gross_pnl_at(price) - self.entry_commission
    }
}

/// A closed position with realized P&L. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub direction: Direction,
    pub entry_time: i64,
    pub entry_price: f64,
    pub exit_time: i64,
    pub exit_price: f64,
    pub size: f64,
    /// Net of entry and exit commission.
    pub pnl: f64,
    pub pnl_percent: f64,
    pub commission: f64,
    pub exit_reason: ExitReason,
}

impl Trade {
    #[inline]
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    #[inline]
    pub fn duration_ms(&self) -> i64 {
        self.exit_time - self.entry_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_pnl_long_and_short() {
        let mut pos = Position {
            id: 1,
            direction: Direction::Long,
            entry_time: 0,
            entry_price: 100.0,
            size: 1000.0,
            quantity: 10.0,
            entry_commission: 1.0,
            stop_loss: None,
            take_profit: None,
        };
        assert!((pos.gross_pnl_at(110.0) - 100.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl(110.0) - 99.0).abs() < 1e-9);

        pos.direction = Direction::Short;
        assert!((pos.gross_pnl_at(110.0) + 100.0).abs() < 1e-9);
    }
}
