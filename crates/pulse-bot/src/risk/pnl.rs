//! Per-bot performance counters.
//!
//! Single-writer: only the owning bot's loop mutates a tracker, either from
//! its own executions or from order-completion notifications routed to it.
//! Daily counters key on the UTC date and reset at the day boundary; streak
//! counters reset on an opposite-outcome completion. All methods take `now`
//! explicitly so gate behavior is testable without a clock.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Rolling rate-limit window, seconds.
const RATE_WINDOW_SECS: i64 = 60;

/// Published performance snapshot, included in every `bot_update`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSnapshot {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Win rate in percent over completed trades.
    pub win_rate: f64,
    pub trades_today: u32,
    pub daily_pnl_realized: f64,
    pub daily_pnl_unrealized: f64,
    /// Realized + unrealized for the current UTC day.
    pub daily_pnl: f64,
    /// Lifetime realized profit.
    pub total_profit: f64,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
}

/// Mutable per-bot counters backing the protection gates.
#[derive(Debug)]
pub struct PerformanceTracker {
    day: NaiveDate,
    trades_today: u32,
    daily_realized: f64,
    unrealized: f64,
    consecutive_losses: u32,
    consecutive_wins: u32,
    total_trades: u64,
    winning_trades: u64,
    losing_trades: u64,
    total_realized: f64,
    recent_orders: VecDeque<DateTime<Utc>>,
    last_order_at: Option<DateTime<Utc>>,
}

impl PerformanceTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            trades_today: 0,
            daily_realized: 0.0,
            unrealized: 0.0,
            consecutive_losses: 0,
            consecutive_wins: 0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_realized: 0.0,
            recent_orders: VecDeque::new(),
            last_order_at: None,
        }
    }

    /// Reset daily counters when the UTC day has rolled over. Unrealized
    /// P&L is left alone; the loop recomputes it from open positions.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.trades_today = 0;
            self.daily_realized = 0.0;
            true
        } else {
            false
        }
    }

    /// Record a successful order submission (rate limit + cooldown inputs).
    pub fn record_execution(&mut self, now: DateTime<Utc>) {
        self.recent_orders.push_back(now);
        self.last_order_at = Some(now);
    }

    /// Record a completed (closed) trade routed back to this bot.
    pub fn record_completion(&mut self, profit: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.total_trades += 1;
        self.trades_today += 1;
        self.daily_realized += profit;
        self.total_realized += profit;

        if profit > 0.0 {
            self.winning_trades += 1;
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else if profit < 0.0 {
            self.losing_trades += 1;
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }
    }

    pub fn set_unrealized(&mut self, unrealized: f64) {
        self.unrealized = unrealized;
    }

    /// Clear streak counters. Part of the manual re-enable path: without
    /// this a resumed bot would trip the same streak gate on its next
    /// signal.
    pub fn reset_streaks(&mut self) {
        self.consecutive_losses = 0;
        self.consecutive_wins = 0;
    }

    /// Orders executed in the trailing rate window.
    pub fn orders_in_last_minute(&mut self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - chrono::Duration::seconds(RATE_WINDOW_SECS);
        while self
            .recent_orders
            .front()
            .is_some_and(|t| *t < cutoff)
        {
            self.recent_orders.pop_front();
        }
        self.recent_orders.len() as u32
    }

    pub fn last_order_at(&self) -> Option<DateTime<Utc>> {
        self.last_order_at
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn consecutive_wins(&self) -> u32 {
        self.consecutive_wins
    }

    /// Realized + unrealized P&L for the current UTC day.
    pub fn daily_pnl(&self) -> f64 {
        self.daily_realized + self.unrealized
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let win_rate = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64 * 100.0
        } else {
            0.0
        };
        PerformanceSnapshot {
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate,
            trades_today: self.trades_today,
            daily_pnl_realized: self.daily_realized,
            daily_pnl_unrealized: self.unrealized,
            daily_pnl: self.daily_pnl(),
            total_profit: self.total_realized,
            consecutive_losses: self.consecutive_losses,
            consecutive_wins: self.consecutive_wins,
        }
    }
}
