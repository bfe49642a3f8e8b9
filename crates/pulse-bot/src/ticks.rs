//! Tick acquisition and normalization.
//!
//! The broker terminal returns tick records in three wire shapes depending on
//! which API produced them: field-named structured records, objects addressed
//! by attribute, and bare positional tuples. [`RawTick`] models the three
//! shapes as a sum type and [`normalize_tick`] collapses them into the
//! canonical [`Tick`] with every access guarded, so a malformed record skips
//! rather than aborts the batch. The sum type never escapes this module's
//! callers: the rest of the engine only sees validated [`TickWindow`]s.
//!
//! Window assembly runs a strictly ordered fallback ladder (full range, info
//! range, last-N, short range, synthesized from the current quote) and only
//! reports `MarketDataUnavailable` when every rung comes up empty.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pulse_common::{Quote, Tick};

use crate::market::{MarketError, SharedMarket, TickClass};

/// Bound for the last-N ladder rung: roughly 20 ticks/second of lookback,
/// capped at the terminal's usual page size.
const MAX_TICKS_FROM: usize = 1000;

/// Short-range rung span, in seconds.
const SHORT_RANGE_SECS: i64 = 10;

/// A raw tick record as delivered by the terminal, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawTick {
    /// Record addressable by string field names (historical batch queries).
    Structured(HashMap<String, f64>),
    /// Record addressable by attribute (live quote objects).
    Attributed {
        bid: Option<f64>,
        ask: Option<f64>,
        last: Option<f64>,
        price: Option<f64>,
        close: Option<f64>,
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
        time: Option<DateTime<Utc>>,
    },
    /// Positional tuple: slot 0 is bid, slot 1 is ask.
    Tuple(Vec<f64>),
}

impl RawTick {
    /// Convenience constructor for a plain bid/ask record.
    pub fn quote(bid: f64, ask: f64, time: DateTime<Utc>) -> Self {
        RawTick::Attributed {
            bid: Some(bid),
            ask: Some(ask),
            last: None,
            price: None,
            close: None,
            open: None,
            high: None,
            low: None,
            time: Some(time),
        }
    }
}

/// Normalize one raw record into a canonical tick.
///
/// Attempts, in order: structured field access, attribute access, positional
/// access. A record that yields no usable prices, or whose prices fail the
/// validity predicate, returns `None` and is skipped by the caller.
/// `default_time` stamps records that carry no timestamp of their own.
pub fn normalize_tick(raw: &RawTick, floor: f64, default_time: DateTime<Utc>) -> Option<Tick> {
    let (bid, ask, time) = match raw {
        RawTick::Structured(fields) => {
            let time = fields
                .get("time")
                .and_then(|secs| DateTime::from_timestamp(*secs as i64, 0))
                .or_else(|| {
                    fields
                        .get("time_msc")
                        .and_then(|ms| DateTime::from_timestamp_millis(*ms as i64))
                });
            match (fields.get("bid"), fields.get("ask")) {
                (Some(&bid), Some(&ask)) => (bid, ask, time),
                // Single-price records collapse to a zero-spread quote.
                _ => {
                    let px = fields
                        .get("last")
                        .or_else(|| fields.get("price"))
                        .or_else(|| fields.get("close"))
                        .or_else(|| fields.get("open"))
                        .or_else(|| fields.get("high"))
                        .or_else(|| fields.get("low"))?;
                    (*px, *px, time)
                }
            }
        }
        RawTick::Attributed {
            bid,
            ask,
            last,
            price,
            close,
            open,
            high,
            low,
            time,
        } => match (bid, ask) {
            (Some(bid), Some(ask)) => (*bid, *ask, *time),
            _ => {
                let px = (*last)
                    .or(*price)
                    .or(*close)
                    .or(*open)
                    .or(*high)
                    .or(*low)?;
                (px, px, *time)
            }
        },
        RawTick::Tuple(slots) => {
            if slots.len() < 2 {
                return None;
            }
            (slots[0], slots[1], None)
        }
    };

    let tick = Tick::new(time.unwrap_or(default_time), bid, ask);
    tick.is_valid(floor).then_some(tick)
}

/// An ordered, time-monotonic window of validated ticks.
#[derive(Debug, Clone, Default)]
pub struct TickWindow {
    ticks: Vec<Tick>,
}

impl TickWindow {
    /// Build a window from raw records, dropping invalid and time-regressing
    /// entries. Test `is_empty()` on the result; an all-dropped batch is an
    /// empty window, never an error.
    pub fn from_raw(records: &[RawTick], floor: f64, default_time: DateTime<Utc>) -> Self {
        let mut ticks: Vec<Tick> = Vec::with_capacity(records.len());
        for raw in records {
            if let Some(tick) = normalize_tick(raw, floor, default_time) {
                // Keep the window monotonic: a record older than the last
                // admitted tick is out of order and gets skipped.
                if ticks.last().map_or(true, |prev| tick.time >= prev.time) {
                    ticks.push(tick);
                }
            }
        }
        Self { ticks }
    }

    /// A one-element window synthesized from the current quote.
    pub fn from_quote(quote: &Quote) -> Self {
        Self {
            ticks: vec![Tick::new(quote.time, quote.bid, quote.ask)],
        }
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn last(&self) -> Option<&Tick> {
        self.ticks.last()
    }

    pub fn bids(&self) -> Vec<f64> {
        self.ticks.iter().map(|t| t.bid).collect()
    }

    pub fn asks(&self) -> Vec<f64> {
        self.ticks.iter().map(|t| t.ask).collect()
    }

    /// Mid-price series, the default strategy input.
    pub fn mids(&self) -> Vec<f64> {
        self.ticks.iter().map(|t| t.mid()).collect()
    }
}

/// Rolling-window fetcher driving the fallback ladder against the port.
pub struct TickPipeline {
    market: SharedMarket,
    symbol: String,
    lookback_secs: u64,
    price_sanity_floor: f64,
    call_timeout: Duration,
}

impl TickPipeline {
    pub fn new(
        market: SharedMarket,
        symbol: impl Into<String>,
        lookback_secs: u64,
        price_sanity_floor: f64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            market,
            symbol: symbol.into(),
            lookback_secs: lookback_secs.max(1),
            price_sanity_floor,
            call_timeout,
        }
    }

    /// Fetch a window spanning at most the configured lookback.
    ///
    /// Walks the ladder until a rung yields at least one valid tick. The
    /// synthesized rung uses `quote`, so with a valid current quote in hand
    /// this only fails if the quote itself is unusable.
    pub async fn fetch_window(&self, quote: &Quote) -> Result<TickWindow, MarketError> {
        let now = Utc::now();
        let from = now - chrono::Duration::seconds(self.lookback_secs as i64);

        // Rung 1: full range, all tick classes.
        if let Some(window) = self.range_rung(from, now, TickClass::All).await {
            return Ok(window);
        }

        // Rung 2: same range, info ticks only.
        if let Some(window) = self.range_rung(from, now, TickClass::Info).await {
            return Ok(window);
        }

        // Rung 3: last-N query.
        let count = (self.lookback_secs as usize * 20).min(MAX_TICKS_FROM);
        match self.guarded(self.market.ticks_from(&self.symbol, from, count)).await {
            Ok(raw) => {
                let window = TickWindow::from_raw(&raw, self.price_sanity_floor, now);
                if !window.is_empty() {
                    debug!(symbol = %self.symbol, rung = 3, ticks = window.len(), "tick ladder hit");
                    return Ok(window);
                }
            }
            Err(err) => debug!(symbol = %self.symbol, rung = 3, %err, "tick ladder rung failed"),
        }

        // Rung 4: short-range repeat.
        let short_from = now - chrono::Duration::seconds(SHORT_RANGE_SECS);
        if let Some(window) = self.range_rung(short_from, now, TickClass::All).await {
            return Ok(window);
        }

        // Rung 5: synthesize from the current quote.
        if quote.is_valid() && quote.bid >= self.price_sanity_floor {
            warn!(symbol = %self.symbol, "tick ladder exhausted, synthesizing window from quote");
            return Ok(TickWindow::from_quote(quote));
        }

        Err(MarketError::NoData)
    }

    async fn range_rung(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        class: TickClass,
    ) -> Option<TickWindow> {
        match self
            .guarded(self.market.ticks_range(&self.symbol, from, to, class))
            .await
        {
            Ok(raw) => {
                let window = TickWindow::from_raw(&raw, self.price_sanity_floor, to);
                if window.is_empty() {
                    None
                } else {
                    debug!(symbol = %self.symbol, ?class, ticks = window.len(), "tick ladder hit");
                    Some(window)
                }
            }
            Err(err) => {
                debug!(symbol = %self.symbol, ?class, %err, "tick ladder rung failed");
                None
            }
        }
    }

    /// Apply the bounded call timeout to a port future.
    async fn guarded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, MarketError>>,
    ) -> Result<T, MarketError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(MarketError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_normalize_structured_bid_ask() {
        let mut fields = HashMap::new();
        fields.insert("time".to_string(), 1_700_000_000.0);
        fields.insert("bid".to_string(), 4300.0);
        fields.insert("ask".to_string(), 4300.5);
        let tick = normalize_tick(&RawTick::Structured(fields), 0.0, ts(0)).unwrap();
        assert_eq!(tick.bid, 4300.0);
        assert_eq!(tick.ask, 4300.5);
    }

    #[test]
    fn test_normalize_structured_last_only() {
        let mut fields = HashMap::new();
        fields.insert("last".to_string(), 4300.25);
        let tick = normalize_tick(&RawTick::Structured(fields), 0.0, ts(0)).unwrap();
        // Single-price records collapse to a zero-spread quote.
        assert_eq!(tick.bid, 4300.25);
        assert_eq!(tick.ask, 4300.25);
        assert_eq!(tick.time, ts(0));

        // Candle-shaped field names work as fallbacks too.
        let mut fields = HashMap::new();
        fields.insert("high".to_string(), 4305.0);
        let tick = normalize_tick(&RawTick::Structured(fields), 0.0, ts(0)).unwrap();
        assert_eq!(tick.mid(), 4305.0);
    }

    #[test]
    fn test_normalize_attributed() {
        let raw = RawTick::quote(4300.0, 4300.5, ts(5));
        let tick = normalize_tick(&raw, 0.0, ts(0)).unwrap();
        assert_eq!(tick.time, ts(5));

        let price_only = RawTick::Attributed {
            bid: None,
            ask: None,
            last: None,
            price: Some(4301.0),
            close: None,
            open: None,
            high: None,
            low: None,
            time: None,
        };
        let tick = normalize_tick(&price_only, 0.0, ts(0)).unwrap();
        assert_eq!(tick.mid(), 4301.0);

        // Candle-shaped records fall through price/close to open/high/low.
        let open_only = RawTick::Attributed {
            bid: None,
            ask: None,
            last: None,
            price: None,
            close: None,
            open: Some(4302.0),
            high: None,
            low: None,
            time: None,
        };
        let tick = normalize_tick(&open_only, 0.0, ts(0)).unwrap();
        assert_eq!(tick.mid(), 4302.0);

        let low_only = RawTick::Attributed {
            bid: None,
            ask: None,
            last: None,
            price: None,
            close: None,
            open: None,
            high: None,
            low: Some(4299.0),
            time: None,
        };
        let tick = normalize_tick(&low_only, 0.0, ts(0)).unwrap();
        assert_eq!(tick.mid(), 4299.0);
    }

    #[test]
    fn test_normalize_tuple() {
        let tick = normalize_tick(&RawTick::Tuple(vec![4300.0, 4300.5]), 0.0, ts(0)).unwrap();
        assert_eq!(tick.bid, 4300.0);
        assert_eq!(tick.ask, 4300.5);

        assert!(normalize_tick(&RawTick::Tuple(vec![4300.0]), 0.0, ts(0)).is_none());
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        // Crossed quote
        assert!(normalize_tick(&RawTick::Tuple(vec![4300.5, 4300.0]), 0.0, ts(0)).is_none());
        // Non-positive prices
        assert!(normalize_tick(&RawTick::Tuple(vec![0.0, 4300.0]), 0.0, ts(0)).is_none());
        // Below sanity floor
        assert!(normalize_tick(&RawTick::Tuple(vec![0.4, 0.5]), 1.0, ts(0)).is_none());
        // Empty record
        let empty = RawTick::Attributed {
            bid: None,
            ask: None,
            last: None,
            price: None,
            close: None,
            open: None,
            high: None,
            low: None,
            time: None,
        };
        assert!(normalize_tick(&empty, 0.0, ts(0)).is_none());
    }

    #[test]
    fn test_window_from_raw_drops_bad_records() {
        let records = vec![
            RawTick::quote(4300.0, 4300.5, ts(1)),
            RawTick::Tuple(vec![-1.0, 2.0]), // invalid, dropped
            RawTick::quote(4301.0, 4301.5, ts(2)),
        ];
        let window = TickWindow::from_raw(&records, 0.0, ts(3));
        assert_eq!(window.len(), 2);
        assert_eq!(window.mids(), vec![4300.25, 4301.25]);
    }

    #[test]
    fn test_window_enforces_monotonic_time() {
        let records = vec![
            RawTick::quote(4300.0, 4300.5, ts(5)),
            RawTick::quote(4299.0, 4299.5, ts(2)), // regresses, dropped
            RawTick::quote(4301.0, 4301.5, ts(6)),
        ];
        let window = TickWindow::from_raw(&records, 0.0, ts(10));
        assert_eq!(window.len(), 2);
        assert!(window.ticks()[0].time <= window.ticks()[1].time);
    }

    #[test]
    fn test_window_from_quote() {
        let quote = Quote {
            bid: 4300.0,
            ask: 4300.5,
            time: ts(0),
        };
        let window = TickWindow::from_quote(&quote);
        assert_eq!(window.len(), 1);
        assert_eq!(window.mids(), vec![4300.25]);
    }

    #[test]
    fn test_derived_series() {
        let records = vec![
            RawTick::quote(4300.0, 4300.5, ts(1)),
            RawTick::quote(4302.0, 4302.5, ts(2)),
        ];
        let window = TickWindow::from_raw(&records, 0.0, ts(3));
        assert_eq!(window.bids(), vec![4300.0, 4302.0]);
        assert_eq!(window.asks(), vec![4300.5, 4302.5]);
        assert_eq!(window.mids(), vec![4300.25, 4302.25]);
    }
}
