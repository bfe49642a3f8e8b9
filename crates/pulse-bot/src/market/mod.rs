//! Market Access Port: the abstract broker-terminal capability set.
//!
//! The engine never talks to a terminal DLL directly. Everything it needs is
//! expressed by the [`MarketAccess`] trait so production wires in a terminal
//! bridge and tests wire in [`MockMarket`]. The port is shared across all bot
//! tasks and must be safe under concurrent calls.

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use pulse_common::{Direction, Position, Quote, SymbolInfo};

use crate::ticks::RawTick;

pub use mock::MockMarket;

/// Broker return codes. Numbering matches the MetaTrader 5 trade return
/// codes so a terminal bridge can pass them through unchanged.
pub mod retcode {
    /// Request completed.
    pub const DONE: u32 = 10009;
    /// Invalid stops (SL/TP too close to market).
    pub const INVALID_STOPS: u32 = 10016;
    /// Not enough money.
    pub const NO_MONEY: u32 = 10019;
    /// Unsupported order filling mode.
    pub const UNSUPPORTED_FILLING: u32 = 10030;
}

/// Errors surfaced by the Market Access Port.
#[derive(Debug, Clone, Error)]
pub enum MarketError {
    #[error("unknown symbol: {0}")]
    SymbolNotFound(String),

    #[error("market access port not ready")]
    NotReady,

    #[error("market access call timed out")]
    Timeout,

    #[error("no market data available")]
    NoData,

    #[error("terminal error: {0}")]
    Terminal(String),
}

/// Tick class selector for historical queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickClass {
    /// Every tick the terminal recorded.
    All,
    /// Best bid/ask (info) updates only.
    Info,
}

/// Order filling mode, tried in ladder order on broker rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillingMode {
    /// Immediate-or-cancel.
    Ioc,
    /// Fill-or-kill.
    Fok,
    /// Return (book) execution.
    Return,
}

impl FillingMode {
    /// Retry ladder: IOC first, then FOK, then RETURN.
    pub const LADDER: [FillingMode; 3] = [FillingMode::Ioc, FillingMode::Fok, FillingMode::Return];
}

impl std::fmt::Display for FillingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillingMode::Ioc => write!(f, "IOC"),
            FillingMode::Fok => write!(f, "FOK"),
            FillingMode::Return => write!(f, "RETURN"),
        }
    }
}

/// A market deal request handed to the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub price: f64,
    /// Stop-loss price; 0 means none.
    pub sl: f64,
    /// Take-profit price; 0 means none.
    pub tp: f64,
    /// Maximum acceptable slippage, in points.
    pub deviation: u32,
    /// Attribution comment (see `pulse_common::tag`).
    pub comment: String,
    pub filling: FillingMode,
    /// Position ticket to close against, for close deals.
    pub position_ticket: Option<u64>,
}

/// Terminal response to an order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSendResult {
    pub retcode: u32,
    pub ticket: u64,
    pub volume: f64,
    pub price: f64,
    /// Realized profit reported by the broker for close deals.
    pub profit: Option<f64>,
}

impl OrderSendResult {
    #[inline]
    pub fn is_done(&self) -> bool {
        self.retcode == retcode::DONE
    }
}

/// The broker-terminal capability set the core consumes.
#[async_trait]
pub trait MarketAccess: Send + Sync {
    /// Static symbol metadata. A failure here at bot start means the symbol
    /// is unknown or the port is not ready.
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, MarketError>;

    /// Latest top-of-book quote.
    async fn current_quote(&self, symbol: &str) -> Result<Quote, MarketError>;

    /// Historical ticks in `[from, to]` for the given class.
    async fn ticks_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        class: TickClass,
    ) -> Result<Vec<RawTick>, MarketError>;

    /// Up to `count` ticks starting at `from`.
    async fn ticks_from(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<RawTick>, MarketError>;

    /// Open positions, optionally filtered by symbol or ticket.
    async fn positions(
        &self,
        symbol: Option<&str>,
        ticket: Option<u64>,
    ) -> Result<Vec<Position>, MarketError>;

    /// Submit a market or close deal.
    async fn order_send(&self, request: &OrderRequest) -> Result<OrderSendResult, MarketError>;
}

/// Shared handle to the Market Access Port.
pub type SharedMarket = Arc<dyn MarketAccess>;
