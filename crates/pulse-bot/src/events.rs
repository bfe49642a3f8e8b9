//! Telemetry events and the broadcast router.
//!
//! One `BotUpdate` is published per loop cycle, plus lifecycle and trade
//! events. Subscribers must treat the stream as lossy (slow consumers are
//! lagged out by the broadcast channel) and order-preserving per bot only;
//! nothing is guaranteed across bots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use pulse_common::{Direction, Quote};

use crate::bot::BotStatus;
use crate::risk::PerformanceSnapshot;
use crate::strategy::Signal;

/// Default broadcast capacity; laggards drop the oldest events.
const CHANNEL_CAPACITY: usize = 256;

/// Why a cycle produced no order. Published as telemetry, never an error.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MarketDataUnavailable,
    SpreadTooWide { spread_points: i64, limit_points: u32 },
    NoSignal,
    LowConfidence { confidence: f64, minimum: f64 },
    ProtectionPaused,
    DailyTradeCap { trades_today: u32, max: u32 },
    RateLimited { in_last_minute: u32, max: u32 },
    CoolingDown { remaining_secs: u64 },
}

/// Events published on the shared channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    BotStarted {
        bot_id: u64,
        strategy: String,
        symbol: String,
        timestamp: DateTime<Utc>,
    },
    BotStopped {
        bot_id: u64,
        timestamp: DateTime<Utc>,
    },
    /// One per loop cycle.
    BotUpdate {
        bot_id: u64,
        status: BotStatus,
        last_quote: Option<Quote>,
        last_signal: Option<Signal>,
        performance: PerformanceSnapshot,
        next_analysis_in_secs: u64,
        timestamp: DateTime<Utc>,
    },
    CycleSkipped {
        bot_id: u64,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
    /// The bot tripped a protection gate and halted submissions.
    ProtectionPaused {
        bot_id: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    TradeExecuted {
        bot_id: u64,
        ticket: u64,
        direction: Direction,
        volume: f64,
        entry_price: f64,
        sl_price: f64,
        tp_price: f64,
        timestamp: DateTime<Utc>,
    },
    TradeCompleted {
        bot_id: u64,
        ticket: u64,
        profit: f64,
        timestamp: DateTime<Utc>,
    },
    TradeError {
        bot_id: u64,
        error: String,
        details: String,
        timestamp: DateTime<Utc>,
    },
    ConfigUpdated {
        bot_id: u64,
        timestamp: DateTime<Utc>,
    },
}

impl BotEvent {
    /// The owning bot, for per-bot filtering in subscribers.
    pub fn bot_id(&self) -> u64 {
        match self {
            BotEvent::BotStarted { bot_id, .. }
            | BotEvent::BotStopped { bot_id, .. }
            | BotEvent::BotUpdate { bot_id, .. }
            | BotEvent::CycleSkipped { bot_id, .. }
            | BotEvent::ProtectionPaused { bot_id, .. }
            | BotEvent::TradeExecuted { bot_id, .. }
            | BotEvent::TradeCompleted { bot_id, .. }
            | BotEvent::TradeError { bot_id, .. }
            | BotEvent::ConfigUpdated { bot_id, .. } => *bot_id,
        }
    }
}

/// Multi-producer, lossy event fan-out.
#[derive(Clone)]
pub struct EventRouter {
    tx: broadcast::Sender<BotEvent>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn publish(&self, event: BotEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
