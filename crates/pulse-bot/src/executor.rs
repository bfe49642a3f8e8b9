//! Order executor: turns a qualifying signal into a submitted deal.
//!
//! Construction is pure pip math: entry at the crossing side of the quote,
//! SL/TP offset by pip distances derived from symbol metadata. Stops are
//! **forced** whenever both prices are positive: a rejection retries with
//! the next filling mode (IOC, FOK, RETURN) or, for a stop-distance
//! rejection, clamps SL/TP outward by one pip and retries once, but never
//! silently drops them. Any other broker rejection surfaces immediately.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use pulse_common::{manual_close_tag, order_tag, Direction, Quote, SymbolInfo};

use crate::config::BotConfig;
use crate::market::{retcode, FillingMode, MarketError, OrderRequest, SharedMarket};
use crate::strategy::Signal;

/// Max slippage for market deals, in points.
const ORDER_DEVIATION_POINTS: u32 = 20;

/// Errors from order submission, classified per the controller taxonomy.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The broker refused the SL/TP distance twice (original and clamped).
    #[error("stop distance rejected by broker")]
    StopDistanceRejected,

    /// Rejected for a reason that does not warrant a retry.
    #[error("order rejected by broker (retcode {retcode})")]
    OrderRejected { retcode: u32 },

    /// Every filling mode in the ladder came back unsupported.
    #[error("no supported filling mode")]
    FillingModeUnsupported,

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("internal executor error: {0}")]
    Internal(String),
}

/// A confirmed execution, as published in `trade_executed`.
#[derive(Debug, Clone)]
pub struct ExecutedOrder {
    pub ticket: u64,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    pub timestamp: DateTime<Utc>,
}

/// External command to close an open position at market.
#[derive(Debug, Clone)]
pub struct ManualCloseRequest {
    /// Ticket of the position being closed.
    pub ticket: u64,
    pub symbol: String,
    pub volume: f64,
    /// Direction of the open position (the close deal takes the opposite
    /// side).
    pub direction: Direction,
}

/// Result of a manual close.
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position_ticket: u64,
    pub deal_ticket: u64,
    pub close_price: f64,
    pub profit: f64,
}

pub struct OrderExecutor {
    market: SharedMarket,
}

impl OrderExecutor {
    pub fn new(market: SharedMarket) -> Self {
        Self { market }
    }

    /// Build and submit the order for a signal.
    ///
    /// Entry is the ask for BUY and the bid for SELL. SL/TP distances come
    /// from the config's resolved pip fields scaled by the symbol's pip size;
    /// a zero pip distance leaves that stop off.
    pub async fn execute_signal(
        &self,
        bot_id: u64,
        config: &BotConfig,
        signal: &Signal,
        quote: &Quote,
        info: &SymbolInfo,
    ) -> Result<ExecutedOrder, ExecutorError> {
        let direction = signal.direction;
        let entry_price = match direction {
            Direction::Buy => quote.ask,
            Direction::Sell => quote.bid,
        };
        if entry_price <= 0.0 {
            return Err(ExecutorError::Internal(format!(
                "invalid entry price {entry_price}"
            )));
        }

        let pip = info.pip_size();
        let sl_pips = config.stop_loss_pips;
        let tp_pips = config.effective_tp_pips();
        let dir = direction.sign();

        let mut sl = if sl_pips > 0.0 {
            entry_price - dir * sl_pips * pip
        } else {
            0.0
        };
        let mut tp = if tp_pips > 0.0 {
            entry_price + dir * tp_pips * pip
        } else {
            0.0
        };

        let volume = info.normalize_volume(config.lot_size_per_trade);
        let comment = order_tag(bot_id, config.mode, direction);
        info!(
            bot_id,
            symbol = %config.symbol,
            %direction,
            volume,
            entry_price,
            sl,
            tp,
            "submitting order"
        );

        let mut filling_idx = 0;
        let mut stops_clamped = false;

        loop {
            let request = OrderRequest {
                symbol: config.symbol.clone(),
                direction,
                volume,
                price: entry_price,
                sl,
                tp,
                deviation: ORDER_DEVIATION_POINTS,
                comment: comment.clone(),
                filling: FillingMode::LADDER[filling_idx],
                position_ticket: None,
            };
            let result = self.market.order_send(&request).await?;

            if result.is_done() {
                info!(
                    bot_id,
                    ticket = result.ticket,
                    filling = %request.filling,
                    "order filled"
                );
                return Ok(ExecutedOrder {
                    ticket: result.ticket,
                    direction,
                    volume: result.volume,
                    entry_price: result.price,
                    sl_price: sl,
                    tp_price: tp,
                    timestamp: Utc::now(),
                });
            }

            match result.retcode {
                retcode::UNSUPPORTED_FILLING => {
                    warn!(
                        bot_id,
                        filling = %request.filling,
                        "filling mode unsupported, trying next"
                    );
                    filling_idx += 1;
                    if filling_idx >= FillingMode::LADDER.len() {
                        return Err(ExecutorError::FillingModeUnsupported);
                    }
                }
                retcode::INVALID_STOPS if sl > 0.0 && tp > 0.0 => {
                    if stops_clamped {
                        return Err(ExecutorError::StopDistanceRejected);
                    }
                    // Clamp both stops outward by one pip and retry once.
                    stops_clamped = true;
                    sl -= dir * pip;
                    tp += dir * pip;
                    warn!(bot_id, sl, tp, "stops rejected, clamped outward one pip");
                }
                other => return Err(ExecutorError::OrderRejected { retcode: other }),
            }
        }
    }

    /// Close an open position at the current crossing quote.
    ///
    /// P&L uses the broker-returned profit when present; otherwise it is
    /// recomputed from the position's entry and the close fill.
    pub async fn close_position(
        &self,
        request: &ManualCloseRequest,
    ) -> Result<ClosedPosition, ExecutorError> {
        let quote = self.market.current_quote(&request.symbol).await?;
        let close_direction = request.direction.opposite();
        let price = match close_direction {
            Direction::Buy => quote.ask,
            Direction::Sell => quote.bid,
        };

        // Entry price for the recompute fallback, captured before the close.
        let entry_price = self
            .market
            .positions(None, Some(request.ticket))
            .await?
            .first()
            .map(|p| p.entry_price);

        let comment = manual_close_tag(request.ticket);
        let mut filling_idx = 0;

        loop {
            let order = OrderRequest {
                symbol: request.symbol.clone(),
                direction: close_direction,
                volume: request.volume,
                price,
                sl: 0.0,
                tp: 0.0,
                deviation: ORDER_DEVIATION_POINTS,
                comment: comment.clone(),
                filling: FillingMode::LADDER[filling_idx],
                position_ticket: Some(request.ticket),
            };
            let result = self.market.order_send(&order).await?;

            if result.is_done() {
                let profit = match (result.profit, entry_price) {
                    (Some(profit), _) => profit,
                    (None, Some(entry)) => {
                        (result.price - entry) * request.direction.sign() * request.volume
                    }
                    (None, None) => 0.0,
                };
                info!(
                    ticket = request.ticket,
                    close_price = result.price,
                    profit,
                    "position closed"
                );
                return Ok(ClosedPosition {
                    position_ticket: request.ticket,
                    deal_ticket: result.ticket,
                    close_price: result.price,
                    profit,
                });
            }

            match result.retcode {
                retcode::UNSUPPORTED_FILLING => {
                    filling_idx += 1;
                    if filling_idx >= FillingMode::LADDER.len() {
                        return Err(ExecutorError::FillingModeUnsupported);
                    }
                }
                other => return Err(ExecutorError::OrderRejected { retcode: other }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MockMarket, OrderSendResult};
    use crate::strategy::Signal;
    use pulse_common::Position;
    use std::sync::Arc;

    fn setup() -> (Arc<MockMarket>, OrderExecutor, BotConfig, Quote, SymbolInfo) {
        let mock = Arc::new(MockMarket::with_eth_defaults());
        let executor = OrderExecutor::new(mock.clone());
        let mut config = BotConfig::default();
        config.stop_loss_pips = 20.0;
        config.take_profit_pips = 40.0;
        config.use_manual_sl_tp = true;
        let quote = Quote {
            bid: 4300.00,
            ask: 4300.50,
            time: Utc::now(),
        };
        let info = SymbolInfo {
            name: "ETHUSD".to_string(),
            point_size: 0.01,
            digits: 2,
            stop_level_points: 10,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        };
        (mock, executor, config, quote, info)
    }

    fn buy_signal() -> Signal {
        Signal::new(Direction::Buy, 4300.50, 0.9, "test")
    }

    #[tokio::test]
    async fn test_buy_pip_math() {
        let (mock, executor, config, quote, info) = setup();
        let order = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap();

        // pip_size = 0.01: SL = entry - 0.20, TP = entry + 0.40.
        assert!((order.entry_price - 4300.50).abs() < 1e-9);
        assert!((order.sl_price - 4300.30).abs() < 1e-9);
        assert!((order.tp_price - 4300.90).abs() < 1e-9);

        let sent = mock.sent_orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].comment, "TradePulse_bot_1_HFT_BUY");
        assert_eq!(sent[0].filling, FillingMode::Ioc);
    }

    #[tokio::test]
    async fn test_sell_pip_math() {
        let (mock, executor, config, quote, info) = setup();
        let signal = Signal::new(Direction::Sell, 4300.00, 0.9, "test");
        let order = executor
            .execute_signal(7, &config, &signal, &quote, &info)
            .await
            .unwrap();

        // SELL enters at the bid with mirrored stops.
        assert!((order.entry_price - 4300.00).abs() < 1e-9);
        assert!((order.sl_price - 4300.20).abs() < 1e-9);
        assert!((order.tp_price - 4299.60).abs() < 1e-9);
        assert_eq!(mock.sent_orders()[0].comment, "TradePulse_bot_7_HFT_SELL");
    }

    #[tokio::test]
    async fn test_derived_tp_from_risk_reward() {
        let (_, executor, mut config, quote, info) = setup();
        config.use_manual_sl_tp = false;
        config.risk_reward_ratio = 3.0;
        config.stop_loss_pips = 10.0;

        let order = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap();
        // TP distance = 3 x SL distance.
        assert!((order.sl_price - 4300.40).abs() < 1e-9);
        assert!((order.tp_price - 4300.80).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_filling_mode_retry() {
        let (mock, executor, config, quote, info) = setup();
        mock.push_rejection(retcode::UNSUPPORTED_FILLING);

        let order = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap();
        assert!(order.ticket > 0);

        let sent = mock.sent_orders();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].filling, FillingMode::Ioc);
        assert_eq!(sent[1].filling, FillingMode::Fok);
        // Stops survive the retry untouched.
        assert!(sent[1].sl > 0.0 && sent[1].tp > 0.0);
    }

    #[tokio::test]
    async fn test_all_filling_modes_unsupported() {
        let (mock, executor, config, quote, info) = setup();
        for _ in 0..3 {
            mock.push_rejection(retcode::UNSUPPORTED_FILLING);
        }
        let err = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::FillingModeUnsupported));
        assert_eq!(mock.sent_order_count(), 3);
    }

    #[tokio::test]
    async fn test_stop_clamp_then_success() {
        let (mock, executor, config, quote, info) = setup();
        mock.push_rejection(retcode::INVALID_STOPS);

        let order = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap();

        let sent = mock.sent_orders();
        assert_eq!(sent.len(), 2);
        // Clamped outward by exactly one pip.
        assert!((sent[1].sl - (sent[0].sl - 0.01)).abs() < 1e-9);
        assert!((sent[1].tp - (sent[0].tp + 0.01)).abs() < 1e-9);
        assert!((order.sl_price - sent[1].sl).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stop_rejected_twice() {
        let (mock, executor, config, quote, info) = setup();
        mock.push_rejection(retcode::INVALID_STOPS);
        mock.push_rejection(retcode::INVALID_STOPS);

        let err = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::StopDistanceRejected));
        assert_eq!(mock.sent_order_count(), 2);
    }

    #[tokio::test]
    async fn test_other_rejection_no_retry() {
        let (mock, executor, config, quote, info) = setup();
        mock.push_rejection(retcode::NO_MONEY);

        let err = executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::OrderRejected {
                retcode: retcode::NO_MONEY
            }
        ));
        assert_eq!(mock.sent_order_count(), 1);
    }

    #[tokio::test]
    async fn test_volume_normalized_to_symbol() {
        let (mock, executor, mut config, quote, info) = setup();
        config.lot_size_per_trade = 0.034;
        executor
            .execute_signal(1, &config, &buy_signal(), &quote, &info)
            .await
            .unwrap();
        assert!((mock.sent_orders()[0].volume - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_manual_close_opposite_side() {
        let (mock, executor, _, _, _) = setup();
        mock.set_positions(vec![Position {
            ticket: 991,
            symbol: "ETHUSD".to_string(),
            direction: Direction::Buy,
            volume: 0.05,
            entry_price: 4290.00,
            profit: 0.5,
            comment: "TradePulse_bot_1_HFT_BUY".to_string(),
        }]);

        let closed = executor
            .close_position(&ManualCloseRequest {
                ticket: 991,
                symbol: "ETHUSD".to_string(),
                volume: 0.05,
                direction: Direction::Buy,
            })
            .await
            .unwrap();

        let sent = mock.sent_orders();
        assert_eq!(sent.len(), 1);
        // Closing a BUY sells at the bid, referencing the position ticket.
        assert_eq!(sent[0].direction, Direction::Sell);
        assert!((sent[0].price - 4300.00).abs() < 1e-9);
        assert_eq!(sent[0].position_ticket, Some(991));
        assert_eq!(sent[0].comment, "Manual_Close_991");
        assert_eq!(closed.position_ticket, 991);
        // No broker profit in the mock result: recomputed from entry/fill.
        assert!((closed.profit - (4300.00 - 4290.00) * 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_manual_close_uses_broker_profit() {
        let (mock, executor, _, _, _) = setup();
        mock.push_order_result(OrderSendResult {
            retcode: retcode::DONE,
            ticket: 5001,
            volume: 0.05,
            price: 4300.00,
            profit: Some(12.34),
        });

        let closed = executor
            .close_position(&ManualCloseRequest {
                ticket: 991,
                symbol: "ETHUSD".to_string(),
                volume: 0.05,
                direction: Direction::Buy,
            })
            .await
            .unwrap();
        assert!((closed.profit - 12.34).abs() < 1e-9);
    }
}
