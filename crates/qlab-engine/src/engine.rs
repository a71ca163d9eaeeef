use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use qlab_core::{
    BacktestConfig, CandleStore, ConfigError, Direction, EquityPoint, ExitReason, Params,
    Position, Signal, Trade,
};
use qlab_strategy::{History, Strategy, StrategyError};

use crate::costs::CostModel;
use crate::metrics::{MetricsCalculator, PerformanceMetrics};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot run a backtest on an empty candle store")]
    EmptyCandles,
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Full backtest result for a single strategy run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub params: Params,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub config: BacktestConfig,
    pub start_date: i64,
    pub end_date: i64,
    pub candle_count: usize,
}

/// Candle-by-candle backtesting engine with a single position slot.
///
/// For every candle:
///   1. Checks stop-loss / take-profit of the open position against the
///      candle's high and low (stop wins when both are crossed)
///   2. Asks the strategy for a signal and executes it at the close,
///      adjusted for slippage
///   3. Appends realized balance plus unrealized P&L to the equity curve
///
/// An engine can be reused: all run state is reset at the start of `run`.
pub struct BacktestEngine {
    config: BacktestConfig,
    costs: CostModel,
    balance: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    next_position_id: u64,
    next_trade_id: u64,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            costs: CostModel::from_config(&config),
            balance: config.initial_capital,
            config,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            next_position_id: 1,
            next_trade_id: 1,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run a full backtest of `strategy` over `candles`.
    pub fn run(
        &mut self,
        candles: &CandleStore,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult, EngineError> {
        if candles.is_empty() {
            return Err(EngineError::EmptyCandles);
        }
        self.config.validate()?;
        self.reset(candles.len());

        strategy.init(candles, &self.config)?;

        for i in 0..candles.len() {
            let candle = candles.get(i);

            self.check_exits(candle.timestamp, candle.high, candle.low);

            let history = History::new(candles, i);
            if let Some(signal) = strategy.on_candle(i, history, self.position.as_ref()) {
                self.execute(&signal, candle.timestamp, candle.close);
            }

            let unrealized = self
                .position
                .as_ref()
                .map_or(0.0, |p| p.unrealized_pnl(candle.close));
            self.equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity: self.balance + unrealized,
            });
        }

        // Force-close whatever is still open at the last close.
        let last = candles.get(candles.len() - 1);
        if self.position.is_some() {
            self.close_position(last.timestamp, last.close, ExitReason::EndOfBacktest);
            if let Some(point) = self.equity_curve.last_mut() {
                point.equity = self.balance;
            }
        }

        strategy.on_complete(&self.trades);

        let trades = std::mem::take(&mut self.trades);
        let equity_curve = std::mem::take(&mut self.equity_curve);
        let start_date = candles.timestamps[0];
        let end_date = last.timestamp;
        let metrics = MetricsCalculator::calculate(
            &trades,
            &equity_curve,
            self.config.initial_capital,
            start_date,
            end_date,
        );

        debug!(
            strategy = strategy.id(),
            candles = candles.len(),
            trades = trades.len(),
            final_equity = self.balance,
            total_return_pct = metrics.total_return_pct,
            "backtest complete"
        );

        Ok(BacktestResult {
            strategy: strategy.id().to_string(),
            params: strategy.params(),
            trades,
            equity_curve,
            metrics,
            config: self.config.clone(),
            start_date,
            end_date,
            candle_count: candles.len(),
        })
    }

    fn reset(&mut self, capacity: usize) {
        self.balance = self.config.initial_capital;
        self.position = None;
        self.trades = Vec::new();
        self.equity_curve = Vec::with_capacity(capacity);
        self.next_position_id = 1;
        self.next_trade_id = 1;
    }

    fn check_exits(&mut self, timestamp: i64, high: f64, low: f64) {
        let Some(pos) = self.position.as_ref() else {
            return;
        };
        let (stop_hit, target_hit) = match pos.direction {
            Direction::Long => (
                pos.stop_loss.is_some_and(|s| low <= s),
                pos.take_profit.is_some_and(|t| high >= t),
            ),
            Direction::Short => (
                pos.stop_loss.is_some_and(|s| high >= s),
                pos.take_profit.is_some_and(|t| low <= t),
            ),
        };

        let exit = if stop_hit {
            pos.stop_loss.map(|s| (s, ExitReason::StopLoss))
        } else if target_hit {
            pos.take_profit.map(|t| (t, ExitReason::TakeProfit))
        } else {
            None
        };
        if let Some((price, reason)) = exit {
            self.close_position(timestamp, price, reason);
        }
    }

    fn execute(&mut self, signal: &Signal, timestamp: i64, close: f64) {
        let Some(direction) = signal.kind.direction() else {
            // SignalKind::Close
            if let Some(pos) = self.position.as_ref() {
                let fill = self.costs.market_fill(close, pos.direction.opposite());
                self.close_position(timestamp, fill.fill_price, ExitReason::Signal);
            }
            return;
        };

        match self.position.as_ref().map(|p| p.direction) {
            Some(open) if open == direction => return,
            Some(open) => {
                let fill = self.costs.market_fill(close, open.opposite());
                self.close_position(timestamp, fill.fill_price, ExitReason::Reversal);
            }
            None => {}
        }
        self.open_position(signal, direction, timestamp, close);
    }

    fn open_position(&mut self, signal: &Signal, direction: Direction, timestamp: i64, close: f64) {
        let cap = self.balance * self.config.max_position_size * self.config.leverage;
        let size = signal.size.map_or(cap, |s| s.min(cap));
        if !(size > 0.0) || !size.is_finite() {
            return;
        }

        let fill = self.costs.market_fill(close, direction);
        if !(fill.fill_price > 0.0) {
            return;
        }

        self.position = Some(Position {
            id: self.next_position_id,
            direction,
            entry_time: timestamp,
            entry_price: fill.fill_price,
            size,
            quantity: size / fill.fill_price,
            entry_commission: self.costs.commission(size),
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
        });
        self.next_position_id += 1;
    }

    fn close_position(&mut self, timestamp: i64, exit_price: f64, reason: ExitReason) {
        let Some(pos) = self.position.take() else {
            return;
        };
        let commission = pos.entry_commission + self.costs.commission(pos.size);
        let pnl = pos.gross_pnl_at(exit_price) - commission;
        self.balance += pnl;

        self.trades.push(Trade {
            id: self.next_trade_id,
            direction: pos.direction,
            entry_time: pos.entry_time,
            entry_price: pos.entry_price,
            exit_time: timestamp,
            exit_price,
            size: pos.size,
            pnl,
            pnl_percent: pnl / pos.size * 100.0,
            commission,
            exit_reason: reason,
        });
        self.next_trade_id += 1;
    }
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new(BacktestConfig::default())
    }
}
