//! The per-bot analysis loop.
//!
//! One tokio task per bot, strictly serial within itself. Each cycle: fetch
//! the current quote, run the spread gate, assemble a tick window through the
//! fallback ladder, evaluate the strategy, walk the protection chain, submit
//! at most one order, refresh performance, publish one `bot_update`, then
//! sleep until the next period. Every error inside the cycle degrades to
//! telemetry; only `stop` ends the loop.
//!
//! The loop is the sole writer of its [`PerformanceTracker`]. Completions and
//! control commands arrive on an mpsc queue and are applied between cycles or
//! during the inter-cycle sleep, which keeps the single-writer invariant
//! without locks on the hot path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use pulse_common::{Quote, SymbolInfo};

use crate::config::BotConfig;
use crate::events::{BotEvent, EventRouter, SkipReason};
use crate::executor::{ExecutorError, OrderExecutor};
use crate::market::SharedMarket;
use crate::risk::{GateTrip, PerformanceSnapshot, PerformanceTracker, ProtectionGates};
use crate::strategy::{build_strategy, Signal};
use crate::supervisor::TradeCompletion;
use crate::ticks::TickPipeline;

/// Bot lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Running,
    PausedProtection,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Running => write!(f, "RUNNING"),
            BotStatus::PausedProtection => write!(f, "PAUSED_PROTECTION"),
            BotStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Externally visible bot state, written only by the owning loop.
#[derive(Debug)]
pub struct BotState {
    pub status: BotStatus,
    pub last_quote: Option<Quote>,
    pub last_signal: Option<Signal>,
    pub performance: PerformanceSnapshot,
}

impl BotState {
    pub(crate) fn new() -> Self {
        Self {
            status: BotStatus::Running,
            last_quote: None,
            last_signal: None,
            performance: PerformanceSnapshot::default(),
        }
    }
}

pub(crate) type SharedBotState = Arc<RwLock<BotState>>;

/// Snapshot returned by the supervisor's `get_details`.
#[derive(Debug, Clone, Serialize)]
pub struct BotDetails {
    pub bot_id: u64,
    pub status: BotStatus,
    pub strategy_name: String,
    pub symbol: String,
    pub last_quote: Option<Quote>,
    pub last_signal: Option<Signal>,
    pub performance: PerformanceSnapshot,
}

/// Control messages routed to a bot by the supervisor.
#[derive(Debug)]
pub(crate) enum BotCommand {
    /// A closed trade attributed to this bot.
    Completion(TradeCompletion),
    /// Recompute unrealized P&L and publish an update now.
    RefreshPerformance,
    /// Operator action: leave `PausedProtection`.
    Resume,
    /// Merge a config patch at the next loop entry.
    Patch(crate::config::ConfigPatch),
}

/// Why the inter-cycle sleep woke up.
enum Wake {
    Timer,
    ShutdownChanged(bool),
    Command(Option<BotCommand>),
}

/// Everything a bot task owns.
pub(crate) struct BotRuntime {
    pub id: u64,
    pub market: SharedMarket,
    pub router: EventRouter,
    pub config: Arc<RwLock<BotConfig>>,
    pub state: SharedBotState,
    pub commands: mpsc::Receiver<BotCommand>,
    pub shutdown: watch::Receiver<bool>,
}

/// Run the analysis loop until cancelled.
pub(crate) async fn run(mut rt: BotRuntime) {
    let executor = OrderExecutor::new(rt.market.clone());
    let mut tracker = PerformanceTracker::new(Utc::now());

    let mut strategy_name = rt.config.read().strategy_name.clone();
    let mut strategy = {
        let cfg = rt.config.read();
        build_strategy(&cfg.strategy_name, &cfg.indicators)
    };

    info!(bot_id = rt.id, strategy = %strategy_name, "bot loop started");

    'main: loop {
        if *rt.shutdown.borrow() {
            break;
        }

        // Apply queued commands before the cycle.
        while let Ok(cmd) = rt.commands.try_recv() {
            apply_command(&rt, &mut tracker, cmd).await;
        }

        let config = rt.config.read().clone();
        if config.strategy_name != strategy_name {
            info!(bot_id = rt.id, from = %strategy_name, to = %config.strategy_name, "strategy changed");
            strategy_name = config.strategy_name.clone();
            strategy = build_strategy(&config.strategy_name, &config.indicators);
        }

        if tracker.roll_day(Utc::now()) {
            info!(bot_id = rt.id, "UTC day rollover, daily counters reset");
        }

        let interval_secs = config.analysis_interval_secs.max(1);
        let call_timeout = Duration::from_secs(config.market_call_timeout_secs.max(1));

        run_cycle(
            &rt,
            &executor,
            &mut tracker,
            strategy.as_mut(),
            &config,
            call_timeout,
            interval_secs,
        )
        .await;

        // Inter-cycle sleep; wakes early for commands, exits on shutdown.
        let sleep = tokio::time::sleep(Duration::from_secs(interval_secs));
        tokio::pin!(sleep);
        loop {
            let wake = tokio::select! {
                _ = &mut sleep => Wake::Timer,
                changed = rt.shutdown.changed() => Wake::ShutdownChanged(changed.is_err()),
                cmd = rt.commands.recv() => Wake::Command(cmd),
            };
            match wake {
                Wake::Timer => break,
                Wake::ShutdownChanged(closed) => {
                    if closed || *rt.shutdown.borrow() {
                        break 'main;
                    }
                }
                Wake::Command(Some(cmd)) => apply_command(&rt, &mut tracker, cmd).await,
                // Command channel closed: the supervisor is gone; park on
                // the shutdown signal instead of spinning on a dead queue.
                Wake::Command(None) => {
                    if rt.shutdown.changed().await.is_err() || *rt.shutdown.borrow() {
                        break 'main;
                    }
                }
            }
        }
    }

    // Finalizer: mark terminal state and emit the last event. Open positions
    // are deliberately left alone.
    rt.state.write().status = BotStatus::Stopped;
    rt.router.publish(BotEvent::BotStopped {
        bot_id: rt.id,
        timestamp: Utc::now(),
    });
    info!(bot_id = rt.id, "bot loop ended");
}

/// One analysis cycle. Never fails: every error path becomes telemetry.
async fn run_cycle(
    rt: &BotRuntime,
    executor: &OrderExecutor,
    tracker: &mut PerformanceTracker,
    strategy: &mut dyn crate::strategy::TickStrategy,
    config: &BotConfig,
    call_timeout: Duration,
    interval_secs: u64,
) {
    let bot_id = rt.id;

    // Symbol metadata; validated at start, so a failure here is transient.
    let info = match guarded(call_timeout, rt.market.symbol_info(&config.symbol)).await {
        Ok(info) => info,
        Err(err) => {
            warn!(bot_id, %err, "symbol info unavailable, skipping cycle");
            finish_cycle(rt, tracker, None, Some(SkipReason::MarketDataUnavailable), interval_secs);
            return;
        }
    };

    // Current quote.
    let quote = match guarded(call_timeout, rt.market.current_quote(&config.symbol)).await {
        Ok(quote) if quote.is_valid() => quote,
        Ok(_) | Err(_) => {
            warn!(bot_id, symbol = %config.symbol, "no usable quote, skipping cycle");
            finish_cycle(rt, tracker, None, Some(SkipReason::MarketDataUnavailable), interval_secs);
            return;
        }
    };
    rt.state.write().last_quote = Some(quote);

    // Gate 1: status. A paused bot keeps evaluating (window, strategy,
    // unrealized P&L) so telemetry continues to flow, but every downstream
    // gate is subordinate to the pause: the cycle reports the pause, never
    // the spread or a later gate.
    let paused = rt.state.read().status != BotStatus::Running;

    // Gate 2: spread. Skip the whole cycle rather than analyze into a bad
    // fill.
    if !paused {
        if let Some(GateTrip::SpreadTooWide {
            spread_points,
            limit_points,
        }) = ProtectionGates::spread(config, &quote, &info)
        {
            debug!(bot_id, spread_points, limit_points, "spread gate tripped");
            refresh_unrealized(rt, tracker, config, call_timeout).await;
            finish_cycle(
                rt,
                tracker,
                Some(quote),
                Some(SkipReason::SpreadTooWide {
                    spread_points,
                    limit_points,
                }),
                interval_secs,
            );
            return;
        }
    }

    // Rolling tick window via the fallback ladder.
    let pipeline = TickPipeline::new(
        rt.market.clone(),
        config.symbol.clone(),
        config.tick_lookback_secs,
        config.price_sanity_floor,
        call_timeout,
    );
    let window = match pipeline.fetch_window(&quote).await {
        Ok(window) => window,
        Err(err) => {
            warn!(bot_id, %err, "tick ladder exhausted, skipping cycle");
            finish_cycle(rt, tracker, Some(quote), Some(SkipReason::MarketDataUnavailable), interval_secs);
            return;
        }
    };

    // Strategy evaluation runs even while paused so telemetry keeps flowing.
    let signal = strategy.evaluate(&window, &quote);
    rt.state.write().last_signal = signal.clone();

    refresh_unrealized(rt, tracker, config, call_timeout).await;

    let skip = if paused {
        Some(SkipReason::ProtectionPaused)
    } else {
        match &signal {
            None => Some(SkipReason::NoSignal),
            Some(signal) => {
                match ProtectionGates::pre_trade(config, tracker, signal.confidence, Utc::now()) {
                    Some(trip) if trip.pauses() => {
                        pause(rt, &trip);
                        Some(SkipReason::ProtectionPaused)
                    }
                    Some(trip) => Some(skip_reason_for(&trip)),
                    None => {
                        submit(rt, executor, tracker, config, signal, &quote, &info).await;
                        None
                    }
                }
            }
        }
    };

    finish_cycle(rt, tracker, Some(quote), skip, interval_secs);
}

/// Submit the order and publish the outcome.
async fn submit(
    rt: &BotRuntime,
    executor: &OrderExecutor,
    tracker: &mut PerformanceTracker,
    config: &BotConfig,
    signal: &Signal,
    quote: &Quote,
    info: &SymbolInfo,
) {
    match executor
        .execute_signal(rt.id, config, signal, quote, info)
        .await
    {
        Ok(order) => {
            tracker.record_execution(order.timestamp);
            rt.router.publish(BotEvent::TradeExecuted {
                bot_id: rt.id,
                ticket: order.ticket,
                direction: order.direction,
                volume: order.volume,
                entry_price: order.entry_price,
                sl_price: order.sl_price,
                tp_price: order.tp_price,
                timestamp: order.timestamp,
            });
        }
        Err(err) => {
            warn!(bot_id = rt.id, %err, "order submission failed");
            rt.router.publish(BotEvent::TradeError {
                bot_id: rt.id,
                error: error_kind(&err).to_string(),
                details: err.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

/// Recompute unrealized P&L from open positions tagged with this bot's id.
async fn refresh_unrealized(
    rt: &BotRuntime,
    tracker: &mut PerformanceTracker,
    config: &BotConfig,
    call_timeout: Duration,
) {
    let tag_prefix = format!("TradePulse_bot_{}_", rt.id);
    match guarded(call_timeout, rt.market.positions(Some(&config.symbol), None)).await {
        Ok(positions) => {
            let unrealized: f64 = positions
                .iter()
                .filter(|p| p.comment.starts_with(&tag_prefix))
                .map(|p| p.profit)
                .sum();
            tracker.set_unrealized(unrealized);
        }
        Err(err) => debug!(bot_id = rt.id, %err, "positions unavailable, keeping last unrealized"),
    }
}

/// Transition to `PausedProtection` and publish the event. Re-enable is a
/// manual operator action; there is no auto-unpause.
fn pause(rt: &BotRuntime, trip: &GateTrip) {
    warn!(bot_id = rt.id, %trip, "protection tripped, pausing");
    rt.state.write().status = BotStatus::PausedProtection;
    rt.router.publish(BotEvent::ProtectionPaused {
        bot_id: rt.id,
        reason: trip.to_string(),
        timestamp: Utc::now(),
    });
}

/// Publish the per-cycle telemetry: optional skip event plus the update.
fn finish_cycle(
    rt: &BotRuntime,
    tracker: &PerformanceTracker,
    quote: Option<Quote>,
    skip: Option<SkipReason>,
    interval_secs: u64,
) {
    let performance = tracker.snapshot();
    {
        let mut state = rt.state.write();
        state.performance = performance.clone();
        if let Some(quote) = quote {
            state.last_quote = Some(quote);
        }
    }

    if let Some(reason) = skip {
        rt.router.publish(BotEvent::CycleSkipped {
            bot_id: rt.id,
            reason,
            timestamp: Utc::now(),
        });
    }

    let state = rt.state.read();
    rt.router.publish(BotEvent::BotUpdate {
        bot_id: rt.id,
        status: state.status,
        last_quote: state.last_quote,
        last_signal: state.last_signal.clone(),
        performance,
        next_analysis_in_secs: interval_secs,
        timestamp: Utc::now(),
    });
}

/// Apply a routed command. Runs between cycles, so the tracker writer is
/// still unique.
async fn apply_command(rt: &BotRuntime, tracker: &mut PerformanceTracker, cmd: BotCommand) {
    match cmd {
        BotCommand::Completion(completion) => {
            let now = Utc::now();
            tracker.record_completion(completion.profit, now);
            rt.router.publish(BotEvent::TradeCompleted {
                bot_id: rt.id,
                ticket: completion.ticket,
                profit: completion.profit,
                timestamp: now,
            });

            // Streak and cap trips take effect immediately, not at the next
            // signal.
            let config = rt.config.read().clone();
            if rt.state.read().status == BotStatus::Running {
                if let Some(trip) = ProtectionGates::pre_trade(&config, tracker, 1.0, now) {
                    if trip.pauses() {
                        pause(rt, &trip);
                    }
                }
            }
        }
        BotCommand::RefreshPerformance => {
            let config = rt.config.read().clone();
            let call_timeout = Duration::from_secs(config.market_call_timeout_secs.max(1));
            refresh_unrealized(rt, tracker, &config, call_timeout).await;
            finish_cycle(rt, tracker, None, None, config.analysis_interval_secs);
        }
        BotCommand::Resume => {
            let mut state = rt.state.write();
            if state.status == BotStatus::PausedProtection {
                state.status = BotStatus::Running;
                tracker.reset_streaks();
                info!(bot_id = rt.id, "protection pause lifted by operator");
            }
        }
        BotCommand::Patch(patch) => {
            rt.config.write().apply_patch(&patch);
            rt.router.publish(BotEvent::ConfigUpdated {
                bot_id: rt.id,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Map a non-pausing gate trip to its telemetry reason.
fn skip_reason_for(trip: &GateTrip) -> SkipReason {
    match trip {
        GateTrip::SpreadTooWide {
            spread_points,
            limit_points,
        } => SkipReason::SpreadTooWide {
            spread_points: *spread_points,
            limit_points: *limit_points,
        },
        GateTrip::DailyTradeCap { trades_today, max } => SkipReason::DailyTradeCap {
            trades_today: *trades_today,
            max: *max,
        },
        GateTrip::RateLimited {
            in_last_minute,
            max,
        } => SkipReason::RateLimited {
            in_last_minute: *in_last_minute,
            max: *max,
        },
        GateTrip::CoolingDown { remaining_secs } => SkipReason::CoolingDown {
            remaining_secs: *remaining_secs,
        },
        GateTrip::LowConfidence {
            confidence,
            minimum,
        } => SkipReason::LowConfidence {
            confidence: *confidence,
            minimum: *minimum,
        },
        // Pausing trips are reported as the pause itself.
        _ => SkipReason::ProtectionPaused,
    }
}

/// Classified error kind for `trade_error` events.
fn error_kind(err: &ExecutorError) -> &'static str {
    match err {
        ExecutorError::StopDistanceRejected => "StopDistanceRejected",
        ExecutorError::OrderRejected { .. } => "OrderRejected",
        ExecutorError::FillingModeUnsupported => "FillingModeUnsupported",
        ExecutorError::Market(_) => "MarketAccessUnavailable",
        ExecutorError::Internal(_) => "Internal",
    }
}

/// Bounded-timeout wrapper for port calls.
async fn guarded<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, crate::market::MarketError>>,
) -> Result<T, crate::market::MarketError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(crate::market::MarketError::Timeout),
    }
}
