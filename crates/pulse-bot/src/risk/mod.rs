//! Protection state machine: the ordered gate chain run before every order.
//!
//! Gate order is part of the contract:
//!
//! 1. status (enforced by the loop itself)
//! 2. spread
//! 3. daily P&L caps
//! 4. loss/win streaks
//! 5. daily trade cap
//! 6. rolling-minute rate limit
//! 7. cooldown
//! 8. signal confidence
//!
//! Cap and streak trips move the bot to `PausedProtection`: the loop keeps
//! evaluating (so unrealized P&L and telemetry continue to flow) but submits
//! nothing until an operator resumes it. Everything else just suppresses the
//! current cycle.

pub mod pnl;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pulse_common::{spread_points, Quote, SymbolInfo};

use crate::config::BotConfig;

pub use pnl::{PerformanceSnapshot, PerformanceTracker};

/// A tripped protection gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum GateTrip {
    SpreadTooWide { spread_points: i64, limit_points: u32 },
    DailyLossCap { daily_pnl: f64, limit: f64 },
    DailyProfitCap { daily_pnl: f64, limit: f64 },
    LossStreak { count: u32, max: u32 },
    WinStreak { count: u32, max: u32 },
    DailyTradeCap { trades_today: u32, max: u32 },
    RateLimited { in_last_minute: u32, max: u32 },
    CoolingDown { remaining_secs: u64 },
    LowConfidence { confidence: f64, minimum: f64 },
}

impl GateTrip {
    /// Whether this trip transitions the bot to `PausedProtection` rather
    /// than merely skipping the cycle.
    pub fn pauses(&self) -> bool {
        matches!(
            self,
            GateTrip::DailyLossCap { .. }
                | GateTrip::DailyProfitCap { .. }
                | GateTrip::LossStreak { .. }
                | GateTrip::WinStreak { .. }
        )
    }
}

impl std::fmt::Display for GateTrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateTrip::SpreadTooWide {
                spread_points,
                limit_points,
            } => write!(f, "spread too wide ({spread_points} > {limit_points} points)"),
            GateTrip::DailyLossCap { daily_pnl, limit } => {
                write!(f, "daily loss cap ({daily_pnl:.2} <= -{limit:.2})")
            }
            GateTrip::DailyProfitCap { daily_pnl, limit } => {
                write!(f, "daily profit cap ({daily_pnl:.2} >= {limit:.2})")
            }
            GateTrip::LossStreak { count, max } => {
                write!(f, "loss streak ({count} >= {max})")
            }
            GateTrip::WinStreak { count, max } => {
                write!(f, "win streak ({count} >= {max})")
            }
            GateTrip::DailyTradeCap { trades_today, max } => {
                write!(f, "daily trade cap ({trades_today} >= {max})")
            }
            GateTrip::RateLimited {
                in_last_minute,
                max,
            } => write!(f, "rate limited ({in_last_minute} >= {max}/min)"),
            GateTrip::CoolingDown { remaining_secs } => {
                write!(f, "cooling down ({remaining_secs}s remaining)")
            }
            GateTrip::LowConfidence {
                confidence,
                minimum,
            } => write!(f, "low confidence ({confidence:.2} < {minimum:.2})"),
        }
    }
}

/// The gate chain. Stateless: counters live in [`PerformanceTracker`].
pub struct ProtectionGates;

impl ProtectionGates {
    /// Gate 2. Evaluated against the live quote before analysis; a trip
    /// skips the whole cycle to avoid trading into a bad fill.
    pub fn spread(config: &BotConfig, quote: &Quote, info: &SymbolInfo) -> Option<GateTrip> {
        if !config.enable_spread_filter {
            return None;
        }
        let limit = config.spread_limit_points();
        if limit == 0 {
            return None;
        }
        let points = spread_points(quote.bid, quote.ask, info.point_size);
        if points > limit as i64 {
            return Some(GateTrip::SpreadTooWide {
                spread_points: points,
                limit_points: limit,
            });
        }
        None
    }

    /// Gates 3 through 8, in contract order. `confidence` is the signal's;
    /// pass the chain only when every gate is open.
    pub fn pre_trade(
        config: &BotConfig,
        tracker: &mut PerformanceTracker,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Option<GateTrip> {
        // Gate 3: daily caps on combined realized + unrealized P&L.
        let daily_pnl = tracker.daily_pnl();
        if config.max_loss_threshold > 0.0 && daily_pnl <= -config.max_loss_threshold {
            return Some(GateTrip::DailyLossCap {
                daily_pnl,
                limit: config.max_loss_threshold,
            });
        }
        if config.max_profit_threshold > 0.0 && daily_pnl >= config.max_profit_threshold {
            return Some(GateTrip::DailyProfitCap {
                daily_pnl,
                limit: config.max_profit_threshold,
            });
        }

        // Gate 4: streaks.
        if config.max_consecutive_losses > 0
            && tracker.consecutive_losses() >= config.max_consecutive_losses
        {
            return Some(GateTrip::LossStreak {
                count: tracker.consecutive_losses(),
                max: config.max_consecutive_losses,
            });
        }
        if config.max_consecutive_profits > 0
            && tracker.consecutive_wins() >= config.max_consecutive_profits
        {
            return Some(GateTrip::WinStreak {
                count: tracker.consecutive_wins(),
                max: config.max_consecutive_profits,
            });
        }

        // Gate 5: daily trade cap.
        if config.max_daily_trades > 0 && tracker.trades_today() >= config.max_daily_trades {
            return Some(GateTrip::DailyTradeCap {
                trades_today: tracker.trades_today(),
                max: config.max_daily_trades,
            });
        }

        // Gate 6: rolling-minute rate limit.
        let in_last_minute = tracker.orders_in_last_minute(now);
        if config.max_orders_per_minute > 0 && in_last_minute >= config.max_orders_per_minute {
            return Some(GateTrip::RateLimited {
                in_last_minute,
                max: config.max_orders_per_minute,
            });
        }

        // Gate 7: cooldown after the last successful order.
        if config.cooldown_secs_after_trade > 0 {
            if let Some(last) = tracker.last_order_at() {
                let elapsed = (now - last).num_seconds();
                let cooldown = config.cooldown_secs_after_trade as i64;
                if elapsed < cooldown {
                    return Some(GateTrip::CoolingDown {
                        remaining_secs: (cooldown - elapsed) as u64,
                    });
                }
            }
        }

        // Gate 8: confidence threshold.
        if confidence < config.min_signal_confidence {
            return Some(GateTrip::LowConfidence {
                confidence,
                minimum: config.min_signal_confidence,
            });
        }

        None
    }
}
