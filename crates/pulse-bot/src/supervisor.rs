//! Bot supervisor: lifecycle, identity, and completion routing.
//!
//! The supervisor owns the registry of running bots. It is the only
//! component that creates or destroys a bot, it issues the monotonically
//! increasing ids embedded in every order tag, and it routes broker-side
//! completions back to the owning bot by parsing those tags, so no shared
//! memory between bots is involved. Reads of the registry are snapshots;
//! the map itself is only mutated by `start` and `stop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pulse_common::parse_order_tag;

use crate::bot::{self, BotCommand, BotDetails, BotRuntime, BotState, SharedBotState};
use crate::config::{BotConfig, ConfigError, ConfigPatch};
use crate::events::{BotEvent, EventRouter};
use crate::executor::{ClosedPosition, ExecutorError, ManualCloseRequest, OrderExecutor};
use crate::market::{MarketError, SharedMarket};

/// Queue depth for per-bot control commands.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// How long `stop` waits for a loop to reach its next suspension point.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced from supervisor operations. Everything else in the engine
/// degrades to telemetry; only these leave the core.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    #[error("market access unavailable: {0}")]
    MarketAccessUnavailable(#[from] MarketError),

    #[error("unknown bot: {0}")]
    UnknownBot(u64),
}

/// A closed trade observed at the broker, ready to route to its owner.
#[derive(Debug, Clone)]
pub struct TradeCompletion {
    pub ticket: u64,
    pub profit: f64,
}

/// Registry entry for one running bot.
struct BotHandle {
    config: Arc<RwLock<BotConfig>>,
    state: SharedBotState,
    shutdown: watch::Sender<bool>,
    commands: mpsc::Sender<BotCommand>,
    task: JoinHandle<()>,
}

/// The controller's bot registry.
pub struct Supervisor {
    market: SharedMarket,
    router: EventRouter,
    bots: DashMap<u64, BotHandle>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(market: SharedMarket) -> Self {
        Self {
            market,
            router: EventRouter::new(),
            bots: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to the shared event channel.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BotEvent> {
        self.router.subscribe()
    }

    /// Create a bot and schedule its loop.
    ///
    /// Fails with `ConfigInvalid` for a bad configuration and with
    /// `MarketAccessUnavailable` when the port rejects the symbol. On
    /// success the bot is `Running` before this returns.
    pub async fn start(&self, config: BotConfig) -> Result<u64, SupervisorError> {
        config.validate()?;
        self.market.symbol_info(&config.symbol).await?;

        let bot_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state: SharedBotState = Arc::new(RwLock::new(BotState::new()));
        let shared_config = Arc::new(RwLock::new(config.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let runtime = BotRuntime {
            id: bot_id,
            market: self.market.clone(),
            router: self.router.clone(),
            config: shared_config.clone(),
            state: state.clone(),
            commands: commands_rx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(bot::run(runtime));

        self.bots.insert(
            bot_id,
            BotHandle {
                config: shared_config,
                state,
                shutdown: shutdown_tx,
                commands: commands_tx,
                task,
            },
        );

        info!(bot_id, strategy = %config.strategy_name, symbol = %config.symbol, "bot started");
        self.router.publish(BotEvent::BotStarted {
            bot_id,
            strategy: config.strategy_name.clone(),
            symbol: config.symbol.clone(),
            timestamp: Utc::now(),
        });
        Ok(bot_id)
    }

    /// Stop a bot. Idempotent: stopping an unknown or already-stopped id is
    /// a no-op, so `bot_stopped` is emitted at most once per bot. Open
    /// positions are not closed.
    pub async fn stop(&self, bot_id: u64) -> Result<(), SupervisorError> {
        let Some((_, handle)) = self.bots.remove(&bot_id) else {
            return Ok(());
        };

        // Signal cancellation; the loop observes it at its next suspension
        // point and runs the finalizer (which emits `bot_stopped`).
        let _ = handle.shutdown.send(true);
        if tokio::time::timeout(STOP_JOIN_TIMEOUT, handle.task)
            .await
            .is_err()
        {
            warn!(bot_id, "bot loop did not stop within the join timeout");
        }
        info!(bot_id, "bot stopped");
        Ok(())
    }

    /// Snapshot of every registered bot.
    pub fn list_active(&self) -> Vec<BotDetails> {
        self.bots
            .iter()
            .map(|entry| Self::details_for(*entry.key(), entry.value()))
            .collect()
    }

    /// Snapshot of one bot.
    pub fn get_details(&self, bot_id: u64) -> Result<BotDetails, SupervisorError> {
        self.bots
            .get(&bot_id)
            .map(|entry| Self::details_for(bot_id, entry.value()))
            .ok_or(SupervisorError::UnknownBot(bot_id))
    }

    pub fn active_count(&self) -> usize {
        self.bots.len()
    }

    /// Ask a bot to refresh unrealized P&L and publish an update now.
    pub async fn force_performance_update(&self, bot_id: u64) -> Result<(), SupervisorError> {
        self.send_command(bot_id, BotCommand::RefreshPerformance)
            .await
    }

    /// Operator action: lift a protection pause.
    pub async fn resume(&self, bot_id: u64) -> Result<(), SupervisorError> {
        self.send_command(bot_id, BotCommand::Resume).await
    }

    /// Merge a config patch; applied at the bot's next loop entry.
    pub async fn update_config(
        &self,
        bot_id: u64,
        patch: ConfigPatch,
    ) -> Result<(), SupervisorError> {
        self.send_command(bot_id, BotCommand::Patch(patch)).await
    }

    /// Route a completed order back to its owner by parsing the attribution
    /// tag. Returns the owning bot id, or `None` when the comment is not a
    /// TradePulse tag or the bot no longer exists.
    pub async fn route_completion(
        &self,
        comment: &str,
        ticket: u64,
        profit: f64,
    ) -> Option<u64> {
        let parsed = parse_order_tag(comment)?;
        let sender = self
            .bots
            .get(&parsed.bot_id)
            .map(|entry| entry.commands.clone())?;
        let completion = TradeCompletion { ticket, profit };
        if sender
            .send(BotCommand::Completion(completion))
            .await
            .is_err()
        {
            warn!(bot_id = parsed.bot_id, ticket, "completion dropped, bot loop gone");
            return None;
        }
        Some(parsed.bot_id)
    }

    /// Close an open position at market (external console command).
    pub async fn close_position(
        &self,
        request: ManualCloseRequest,
    ) -> Result<ClosedPosition, ExecutorError> {
        OrderExecutor::new(self.market.clone())
            .close_position(&request)
            .await
    }

    async fn send_command(
        &self,
        bot_id: u64,
        command: BotCommand,
    ) -> Result<(), SupervisorError> {
        let sender = self
            .bots
            .get(&bot_id)
            .map(|entry| entry.commands.clone())
            .ok_or(SupervisorError::UnknownBot(bot_id))?;
        sender
            .send(command)
            .await
            .map_err(|_| SupervisorError::UnknownBot(bot_id))
    }

    fn details_for(bot_id: u64, handle: &BotHandle) -> BotDetails {
        let config = handle.config.read();
        let state = handle.state.read();
        BotDetails {
            bot_id,
            status: state.status,
            strategy_name: config.strategy_name.clone(),
            symbol: config.symbol.clone(),
            last_quote: state.last_quote,
            last_signal: state.last_signal.clone(),
            performance: state.performance.clone(),
        }
    }
}
