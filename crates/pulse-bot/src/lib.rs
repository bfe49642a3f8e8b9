//! TradePulse multi-bot HFT controller core.
//!
//! This crate implements the per-bot tick-driven trading loop and the signal
//! strategy library it consumes. The broker terminal is abstracted behind the
//! [`market::MarketAccess`] port so the whole engine runs unchanged against a
//! live terminal bridge or the in-memory mock used by tests.
//!
//! ## Architecture
//!
//! - **Supervisor** owns the bot registry: it creates bots, issues their
//!   identities, routes order completions back by parsing attribution tags,
//!   and is the only component that may destroy a bot.
//! - **Bot loop** is one tokio task per bot. Each cycle fetches the current
//!   quote, assembles a rolling tick window through a fallback ladder,
//!   evaluates the configured strategy, walks the protection gate chain, and
//!   submits at most one order.
//! - **Event router** fans per-bot updates, trades, and errors out on a lossy
//!   broadcast channel. Events from one bot arrive in loop order; nothing is
//!   guaranteed across bots.
//!
//! ## Modules
//!
//! - `config`: validated per-bot configuration with legacy field aliases
//! - `market`: Market Access Port trait, broker retcodes, in-memory mock
//! - `ticks`: raw-tick normalization and the window fetch ladder
//! - `strategy`: indicator strategies with progressive minimal-data fallbacks
//! - `executor`: order construction, filling-mode retries, manual close
//! - `risk`: protection gate chain and per-bot performance counters
//! - `events`: telemetry event types and the broadcast router
//! - `supervisor` / `bot`: lifecycle and the analysis loop itself

pub mod bot;
pub mod config;
pub mod events;
pub mod executor;
pub mod market;
pub mod risk;
pub mod strategy;
pub mod supervisor;
pub mod ticks;

pub use bot::{BotDetails, BotStatus};
pub use config::{BotConfig, ConfigError, ConfigPatch, IndicatorSettings};
pub use events::{BotEvent, EventRouter, SkipReason};
pub use executor::{ClosedPosition, ExecutedOrder, ExecutorError, ManualCloseRequest, OrderExecutor};
pub use market::{
    retcode, FillingMode, MarketAccess, MarketError, MockMarket, OrderRequest, OrderSendResult,
    SharedMarket, TickClass,
};
pub use risk::{GateTrip, PerformanceSnapshot, PerformanceTracker, ProtectionGates};
pub use strategy::{build_strategy, Signal, TickStrategy};
pub use supervisor::{Supervisor, SupervisorError, TradeCompletion};
pub use ticks::{RawTick, TickPipeline, TickWindow};
