//! In-memory Market Access Port for tests.
//!
//! `MockMarket` is fully scriptable: tests seed quotes, per-rung tick
//! batches, open positions, and a queue of order results, then assert on the
//! requests the engine actually sent. With no scripted results every order
//! succeeds with an auto-incremented ticket, which keeps the happy path
//! cheap to set up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use pulse_common::{Position, Quote, SymbolInfo};

use super::{retcode, MarketAccess, MarketError, OrderRequest, OrderSendResult, TickClass};
use crate::ticks::RawTick;

#[derive(Default)]
struct MockData {
    symbols: Vec<SymbolInfo>,
    quote: Option<Quote>,
    range_all: Vec<RawTick>,
    range_info: Vec<RawTick>,
    from_ticks: Vec<RawTick>,
    positions: Vec<Position>,
    order_results: VecDeque<OrderSendResult>,
    sent_orders: Vec<OrderRequest>,
}

/// Scriptable in-memory broker terminal.
pub struct MockMarket {
    data: Mutex<MockData>,
    next_ticket: AtomicU64,
    fail_tick_queries: AtomicBool,
}

impl Default for MockMarket {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarket {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(MockData::default()),
            next_ticket: AtomicU64::new(1000),
            fail_tick_queries: AtomicBool::new(false),
        }
    }

    /// A mock pre-seeded with a 2-digit ETHUSD-like symbol and a quote.
    /// Point size 0.01 and digits 2 give pip_size == 0.01.
    pub fn with_eth_defaults() -> Self {
        let mock = Self::new();
        mock.add_symbol(SymbolInfo {
            name: "ETHUSD".to_string(),
            point_size: 0.01,
            digits: 2,
            stop_level_points: 10,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
        });
        mock.set_quote(Quote {
            bid: 4300.00,
            ask: 4300.50,
            time: Utc::now(),
        });
        mock
    }

    pub fn add_symbol(&self, info: SymbolInfo) {
        self.data.lock().symbols.push(info);
    }

    pub fn set_quote(&self, quote: Quote) {
        self.data.lock().quote = Some(quote);
    }

    pub fn set_range_ticks(&self, ticks: Vec<RawTick>) {
        self.data.lock().range_all = ticks;
    }

    pub fn set_info_ticks(&self, ticks: Vec<RawTick>) {
        self.data.lock().range_info = ticks;
    }

    pub fn set_from_ticks(&self, ticks: Vec<RawTick>) {
        self.data.lock().from_ticks = ticks;
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.data.lock().positions = positions;
    }

    /// Queue a scripted result for the next `order_send` call.
    pub fn push_order_result(&self, result: OrderSendResult) {
        self.data.lock().order_results.push_back(result);
    }

    /// Shorthand: queue a rejection with the given retcode.
    pub fn push_rejection(&self, code: u32) {
        self.push_order_result(OrderSendResult {
            retcode: code,
            ticket: 0,
            volume: 0.0,
            price: 0.0,
            profit: None,
        });
    }

    /// Make every tick-history query fail, forcing the synthesized rung.
    pub fn fail_tick_queries(&self, fail: bool) {
        self.fail_tick_queries.store(fail, Ordering::Release);
    }

    /// All order requests the engine submitted, in order.
    pub fn sent_orders(&self) -> Vec<OrderRequest> {
        self.data.lock().sent_orders.clone()
    }

    pub fn sent_order_count(&self) -> usize {
        self.data.lock().sent_orders.len()
    }
}

#[async_trait]
impl MarketAccess for MockMarket {
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, MarketError> {
        self.data
            .lock()
            .symbols
            .iter()
            .find(|s| s.name == symbol)
            .cloned()
            .ok_or_else(|| MarketError::SymbolNotFound(symbol.to_string()))
    }

    async fn current_quote(&self, symbol: &str) -> Result<Quote, MarketError> {
        let _ = symbol;
        self.data.lock().quote.ok_or(MarketError::NoData)
    }

    async fn ticks_range(
        &self,
        _symbol: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        class: TickClass,
    ) -> Result<Vec<RawTick>, MarketError> {
        if self.fail_tick_queries.load(Ordering::Acquire) {
            return Err(MarketError::NoData);
        }
        let data = self.data.lock();
        Ok(match class {
            TickClass::All => data.range_all.clone(),
            TickClass::Info => data.range_info.clone(),
        })
    }

    async fn ticks_from(
        &self,
        _symbol: &str,
        _from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<RawTick>, MarketError> {
        if self.fail_tick_queries.load(Ordering::Acquire) {
            return Err(MarketError::NoData);
        }
        let data = self.data.lock();
        Ok(data.from_ticks.iter().take(count).cloned().collect())
    }

    async fn positions(
        &self,
        symbol: Option<&str>,
        ticket: Option<u64>,
    ) -> Result<Vec<Position>, MarketError> {
        let data = self.data.lock();
        Ok(data
            .positions
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .filter(|p| ticket.map_or(true, |t| p.ticket == t))
            .cloned()
            .collect())
    }

    async fn order_send(&self, request: &OrderRequest) -> Result<OrderSendResult, MarketError> {
        let mut data = self.data.lock();
        data.sent_orders.push(request.clone());
        if let Some(result) = data.order_results.pop_front() {
            return Ok(result);
        }
        // Unscripted sends succeed at the requested price.
        Ok(OrderSendResult {
            retcode: retcode::DONE,
            ticket: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            volume: request.volume,
            price: request.price,
            profit: None,
        })
    }
}
