//! Shared market types for the TradePulse controller.
//!
//! All prices are `f64`: the broker terminal hands us IEEE doubles and the
//! indicator pipeline needs transcendental math on top of them. Anything that
//! must compare exactly (spreads, stop distances) is first scaled to integer
//! points via the symbol's `point_size`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Returns the display name used in order tags and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }

    /// The opposite side, used when closing a position.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// Sign convention for pip math: +1 for BUY, -1 for SELL.
    #[inline]
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bot analysis mode. This crate implements the tick-driven HFT loop; the
/// candle loop lives behind the same tag grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    #[default]
    Hft,
    Candle,
}

impl TradeMode {
    /// Marker string embedded in order tags (`_HFT_` / `_CANDLE_`).
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Hft => "HFT",
            TradeMode::Candle => "CANDLE",
        }
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TradeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HFT" => Ok(TradeMode::Hft),
            "CANDLE" => Ok(TradeMode::Candle),
            other => Err(format!("unknown trade mode: {other}")),
        }
    }
}

/// Latest top-of-book quote for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

impl Quote {
    /// Mid price, the series most strategies consume.
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// A quote is usable when both sides are positive and not crossed.
    pub fn is_valid(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid
    }
}

/// A single validated tick observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    pub fn new(time: DateTime<Utc>, bid: f64, ask: f64) -> Self {
        Self { time, bid, ask }
    }

    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Validity predicate applied before a tick may enter a window.
    /// `floor` is an optional per-instrument sanity floor (0 disables it).
    pub fn is_valid(&self, floor: f64) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid && self.bid >= floor
    }
}

/// Static symbol metadata from the broker terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Smallest quote increment.
    pub point_size: f64,
    /// Number of decimal digits in quotes.
    pub digits: u32,
    /// Broker minimum stop distance, in points.
    pub stop_level_points: u32,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

impl SymbolInfo {
    /// Pip size derived from metadata, never from a hard-coded symbol table.
    #[inline]
    pub fn pip_size(&self) -> f64 {
        self.point_size * pip_multiplier(self.digits)
    }

    /// Broker minimum stop distance as a price delta.
    #[inline]
    pub fn min_stop_distance(&self) -> f64 {
        self.stop_level_points as f64 * self.point_size
    }

    /// Clamp a requested volume to the symbol's limits and round it to the
    /// nearest volume step.
    pub fn normalize_volume(&self, requested: f64) -> f64 {
        let clamped = requested.clamp(self.volume_min, self.volume_max);
        if self.volume_step > 0.0 {
            let stepped = (clamped / self.volume_step).round() * self.volume_step;
            stepped.max(self.volume_min)
        } else {
            clamped
        }
    }
}

/// Pip multiplier by quote precision: 3/5-digit quotes use fractional pips.
#[inline]
pub fn pip_multiplier(digits: u32) -> f64 {
    match digits {
        3 | 5 => 10.0,
        _ => 1.0,
    }
}

/// Spread expressed in integer points.
#[inline]
pub fn spread_points(bid: f64, ask: f64, point_size: f64) -> i64 {
    if point_size <= 0.0 || bid <= 0.0 || ask <= 0.0 {
        return 0;
    }
    ((ask - bid) / point_size).round() as i64
}

/// An open position as reported by the broker terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    /// Floating profit including commission and swap.
    pub profit: f64,
    pub comment: String,
}
