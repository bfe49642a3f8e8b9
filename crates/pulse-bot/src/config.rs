//! Per-bot configuration.
//!
//! Supports loading from a TOML file, deserializing API payloads, and merging
//! runtime patches. Legacy field names from older console builds
//! (`sl_pips`/`tp_pips`/`stopLoss`/`takeProfit`, `lotSize`, `useManualSlTp`)
//! are accepted as serde aliases so existing saved configurations keep
//! working.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use pulse_common::TradeMode;

/// Validation failure for a bot configuration. Surfaced to the caller at
/// `start` as `ConfigInvalid`.
#[derive(Debug, Clone, Error)]
#[error("invalid config: {0}")]
pub struct ConfigError(pub String);

/// Default per-symbol spread limits, in points. Overridable via
/// `symbol_spread_limit`.
const DEFAULT_SPREAD_LIMITS: [(&str, u32); 6] = [
    ("ETHUSD", 1000),
    ("BTCUSD", 1000),
    ("EURUSD", 5),
    ("GBPUSD", 10),
    ("USDJPY", 10),
    ("XAUUSD", 50),
];

/// Fallback spread limit for symbols not in the default table.
const FALLBACK_SPREAD_LIMIT: u32 = 1000;

/// Immutable per-cycle snapshot of a bot's configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Candle-based or tick-based loop; this crate drives the HFT loop.
    pub mode: TradeMode,

    /// Strategy name, resolved through the registry's alias table.
    pub strategy_name: String,

    /// Instrument identifier passed to Market Access.
    pub symbol: String,

    /// Period of the analysis loop, seconds (>= 1).
    pub analysis_interval_secs: u64,

    /// Span of the rolling tick window, seconds (>= 1).
    pub tick_lookback_secs: u64,

    /// Signals below this confidence are dropped.
    pub min_signal_confidence: f64,

    /// Volume per order, in broker lots.
    #[serde(alias = "lotSize")]
    pub lot_size_per_trade: f64,

    /// Stop-loss distance in pips.
    #[serde(alias = "sl_pips", alias = "stopLoss")]
    pub stop_loss_pips: f64,

    /// Take-profit distance in pips. Only used directly when
    /// `use_manual_sl_tp` is set; otherwise derived from the risk-reward
    /// ratio.
    #[serde(alias = "tp_pips", alias = "takeProfit")]
    pub take_profit_pips: f64,

    /// When true, SL/TP come straight from the pip fields.
    #[serde(alias = "useManualSlTp")]
    pub use_manual_sl_tp: bool,

    /// TP multiplier applied to SL when `use_manual_sl_tp` is false.
    pub risk_reward_ratio: f64,

    /// Trade-count cap per UTC day.
    #[serde(alias = "maxDailyTrades")]
    pub max_daily_trades: u32,

    /// Rolling-minute order cap.
    pub max_orders_per_minute: u32,

    /// Minimum gap after any successful order, seconds.
    pub cooldown_secs_after_trade: u64,

    /// Daily loss cap in account currency (realized + unrealized).
    pub max_loss_threshold: f64,

    /// Daily profit pause threshold in account currency.
    pub max_profit_threshold: f64,

    /// Protection trip after this many consecutive losses.
    pub max_consecutive_losses: u32,

    /// Protection pause after this many consecutive wins.
    pub max_consecutive_profits: u32,

    /// Reject the cycle when the spread exceeds the symbol limit.
    pub enable_spread_filter: bool,

    /// Spread limit in points; `None` uses the per-symbol default table.
    pub symbol_spread_limit: Option<u32>,

    /// Quotes below this are treated as data glitches and dropped.
    /// 0 disables the floor.
    pub price_sanity_floor: f64,

    /// Bounded timeout for Market Access calls, seconds.
    pub market_call_timeout_secs: u64,

    /// Per-strategy indicator parameters.
    pub indicators: IndicatorSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: TradeMode::Hft,
            strategy_name: "rsi_strategy".to_string(),
            symbol: "ETHUSD".to_string(),
            analysis_interval_secs: 5,
            tick_lookback_secs: 60,
            min_signal_confidence: 0.4,
            lot_size_per_trade: 0.01,
            stop_loss_pips: 15.0,
            take_profit_pips: 30.0,
            use_manual_sl_tp: true,
            risk_reward_ratio: 2.0,
            max_daily_trades: 100,
            max_orders_per_minute: 10,
            cooldown_secs_after_trade: 2,
            max_loss_threshold: 100.0,
            max_profit_threshold: 200.0,
            max_consecutive_losses: 3,
            max_consecutive_profits: 5,
            enable_spread_filter: false,
            symbol_spread_limit: None,
            price_sanity_floor: 0.0,
            market_call_timeout_secs: 5,
            indicators: IndicatorSettings::default(),
        }
    }
}

impl BotConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Validate required fields and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError("symbol must not be empty".to_string()));
        }
        if self.strategy_name.trim().is_empty() {
            return Err(ConfigError("strategy_name must not be empty".to_string()));
        }
        if self.analysis_interval_secs < 1 {
            return Err(ConfigError("analysis_interval_secs must be >= 1".to_string()));
        }
        if self.tick_lookback_secs < 1 {
            return Err(ConfigError("tick_lookback_secs must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_signal_confidence) {
            return Err(ConfigError(
                "min_signal_confidence must be within [0, 1]".to_string(),
            ));
        }
        if self.lot_size_per_trade <= 0.0 {
            return Err(ConfigError("lot_size_per_trade must be > 0".to_string()));
        }
        if self.stop_loss_pips < 0.0 || self.take_profit_pips < 0.0 {
            return Err(ConfigError("SL/TP pips must not be negative".to_string()));
        }
        if !self.use_manual_sl_tp && self.risk_reward_ratio <= 0.0 {
            return Err(ConfigError(
                "risk_reward_ratio must be > 0 when SL/TP is derived".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective take-profit distance in pips: manual value, or SL scaled by
    /// the risk-reward ratio.
    pub fn effective_tp_pips(&self) -> f64 {
        if self.use_manual_sl_tp {
            self.take_profit_pips
        } else {
            self.risk_reward_ratio * self.stop_loss_pips
        }
    }

    /// Spread limit for this bot's symbol, in points.
    pub fn spread_limit_points(&self) -> u32 {
        if let Some(limit) = self.symbol_spread_limit {
            return limit;
        }
        DEFAULT_SPREAD_LIMITS
            .iter()
            .find(|(sym, _)| *sym == self.symbol)
            .map(|(_, limit)| *limit)
            .unwrap_or(FALLBACK_SPREAD_LIMIT)
    }

    /// Apply a runtime patch. Takes effect at the bot's next loop entry.
    pub fn apply_patch(&mut self, patch: &ConfigPatch) {
        if let Some(name) = &patch.strategy_name {
            self.strategy_name = name.clone();
        }
        if let Some(v) = patch.analysis_interval_secs {
            self.analysis_interval_secs = v.max(1);
        }
        if let Some(v) = patch.tick_lookback_secs {
            self.tick_lookback_secs = v.max(1);
        }
        if let Some(v) = patch.min_signal_confidence {
            self.min_signal_confidence = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.lot_size_per_trade {
            self.lot_size_per_trade = v;
        }
        if let Some(v) = patch.stop_loss_pips {
            self.stop_loss_pips = v;
        }
        if let Some(v) = patch.take_profit_pips {
            self.take_profit_pips = v;
        }
        if let Some(v) = patch.use_manual_sl_tp {
            self.use_manual_sl_tp = v;
        }
        if let Some(v) = patch.risk_reward_ratio {
            self.risk_reward_ratio = v;
        }
        if let Some(v) = patch.max_daily_trades {
            self.max_daily_trades = v;
        }
        if let Some(v) = patch.max_orders_per_minute {
            self.max_orders_per_minute = v;
        }
        if let Some(v) = patch.cooldown_secs_after_trade {
            self.cooldown_secs_after_trade = v;
        }
        if let Some(v) = patch.enable_spread_filter {
            self.enable_spread_filter = v;
        }
        if let Some(v) = patch.symbol_spread_limit {
            self.symbol_spread_limit = Some(v);
        }
    }
}

/// Partial configuration update accepted at runtime. Console builds send the
/// camelCase aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub strategy_name: Option<String>,
    pub analysis_interval_secs: Option<u64>,
    pub tick_lookback_secs: Option<u64>,
    pub min_signal_confidence: Option<f64>,
    #[serde(alias = "lotSize")]
    pub lot_size_per_trade: Option<f64>,
    #[serde(alias = "sl_pips", alias = "stopLoss")]
    pub stop_loss_pips: Option<f64>,
    #[serde(alias = "tp_pips", alias = "takeProfit")]
    pub take_profit_pips: Option<f64>,
    #[serde(alias = "useManualSlTp")]
    pub use_manual_sl_tp: Option<bool>,
    pub risk_reward_ratio: Option<f64>,
    #[serde(alias = "maxDailyTrades")]
    pub max_daily_trades: Option<u32>,
    pub max_orders_per_minute: Option<u32>,
    pub cooldown_secs_after_trade: Option<u64>,
    pub enable_spread_filter: Option<bool>,
    pub symbol_spread_limit: Option<u32>,
}

// =============================================================================
// Indicator settings
// =============================================================================

/// Per-strategy indicator parameters, all with conventional defaults.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi: RsiSettings,
    pub moving_average: MovingAverageSettings,
    pub macd: MacdSettings,
    pub stochastic: StochasticSettings,
    pub breakout: BreakoutSettings,
    pub vwap: VwapSettings,
    pub bollinger: BollingerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RsiSettings {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiSettings {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MovingAverageSettings {
    pub ma_fast_period: usize,
    pub ma_slow_period: usize,
    /// Near-cross proximity band as a fraction of the mid price.
    pub proximity_pct: f64,
}

impl Default for MovingAverageSettings {
    fn default() -> Self {
        Self {
            ma_fast_period: 5,
            ma_slow_period: 10,
            proximity_pct: 0.0005,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MacdSettings {
    pub fast: usize,
    pub slow: usize,
    pub signal_period: usize,
}

impl Default for MacdSettings {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal_period: 9,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StochasticSettings {
    pub k_period: usize,
    pub d_period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for StochasticSettings {
    fn default() -> Self {
        Self {
            k_period: 8,
            d_period: 3,
            oversold: 20.0,
            overbought: 80.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakoutSettings {
    pub lookback: usize,
    /// Breakout threshold relative to the window's price range.
    pub threshold: f64,
}

impl Default for BreakoutSettings {
    fn default() -> Self {
        Self {
            lookback: 10,
            threshold: 0.001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VwapSettings {
    pub period: usize,
    /// Minimum deviation from VWAP (percent) before a band signal fires.
    pub deviation_threshold: f64,
}

impl Default for VwapSettings {
    fn default() -> Self {
        Self {
            period: 20,
            deviation_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BollingerSettings {
    pub period: usize,
    pub deviation: f64,
}

impl Default for BollingerSettings {
    fn default() -> Self {
        Self {
            period: 20,
            deviation: 2.0,
        }
    }
}
