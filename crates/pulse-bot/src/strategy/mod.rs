//! Signal strategy library.
//!
//! Every strategy implements [`TickStrategy`] over a validated tick window
//! and the current quote. The windows a live terminal produces range from
//! hundreds of ticks down to a single synthesized quote, so each strategy is
//! total over `1..=N` via explicit progressive-fallback branches: a full
//! indicator computation where the window allows it, simplified variants
//! below that, and a documented deterministic mapping at the bottom. A
//! too-small window is never an error.
//!
//! Evaluations log the window size, the branch taken, the indicator value,
//! and the emitted signal or suppression reason.

pub mod always;
pub mod bollinger;
pub mod breakout;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod stochastic;
pub mod vwap;

use serde::Serialize;
use tracing::warn;

use pulse_common::{Direction, Quote};

use crate::config::IndicatorSettings;
use crate::ticks::TickWindow;

pub use always::AlwaysSignalStrategy;
pub use bollinger::BollingerStrategy;
pub use breakout::BreakoutStrategy;
pub use macd::MacdStrategy;
pub use moving_average::MovingAverageStrategy;
pub use rsi::RsiStrategy;
pub use stochastic::StochasticStrategy;
pub use vwap::VwapStrategy;

/// A directional trading signal.
///
/// Absence of a signal is `None` at the call site; there are no sentinel
/// prices or null directions.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub direction: Direction,
    pub price: f64,
    /// Strength mapping in `[0, 1]`, monotone per strategy.
    pub confidence: f64,
    pub reason: String,
}

impl Signal {
    pub fn new(
        direction: Direction,
        price: f64,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            price,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }
}

/// A tick-window strategy. Stateful strategies (the alternating test
/// strategy) take `&mut self`; indicator strategies are pure over the window.
pub trait TickStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate one analysis cycle. `quote` backs the synthesized fallback
    /// paths; indicator paths read the window's mid series.
    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal>;
}

/// Resolve a strategy by name.
///
/// Lookup is forgiving: names are lowercased and separators stripped, and the
/// short aliases the console sends (`rsi`, `ma`, `stoch`, ...) are accepted.
/// Unknown names fall back to RSI, the default HFT strategy.
pub fn build_strategy(name: &str, settings: &IndicatorSettings) -> Box<dyn TickStrategy> {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '_' | ' ' | '-'))
        .collect();

    match normalized.as_str() {
        "rsi" | "rsistrategy" | "default" | "" => Box::new(RsiStrategy::new(settings.rsi.clone())),
        "macd" | "macdstrategy" => Box::new(MacdStrategy::new(settings.macd.clone())),
        "bollinger" | "bollingerbands" => {
            Box::new(BollingerStrategy::new(settings.bollinger.clone()))
        }
        "ma" | "movingaverage" => {
            Box::new(MovingAverageStrategy::new(settings.moving_average.clone()))
        }
        "breakout" => Box::new(BreakoutStrategy::new(settings.breakout.clone())),
        "stoch" | "stochastic" => Box::new(StochasticStrategy::new(settings.stochastic.clone())),
        "vwap" => Box::new(VwapStrategy::new(settings.vwap.clone())),
        "always" | "alwayssignal" => Box::new(AlwaysSignalStrategy::new()),
        other => {
            warn!(requested = %name, normalized = %other, "unknown strategy, falling back to RSI");
            Box::new(RsiStrategy::new(settings.rsi.clone()))
        }
    }
}

/// Names accepted by the registry, for console listings.
pub fn list_strategies() -> &'static [&'static str] {
    &[
        "rsi_strategy",
        "macd_strategy",
        "bollinger_bands",
        "moving_average",
        "breakout",
        "stochastic",
        "vwap",
        "always_signal",
    ]
}

// =============================================================================
// Shared indicator math
// =============================================================================

/// Simple moving average over the whole slice.
pub(crate) fn sma(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Exponential moving average seeded with the first value.
pub(crate) fn ema(values: &[f64], period: usize) -> f64 {
    let Some((&first, rest)) = values.split_first() else {
        return 0.0;
    };
    let k = 2.0 / (period as f64 + 1.0);
    rest.iter().fold(first, |ema, &v| v * k + ema * (1.0 - k))
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = sma(values);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Percent change from first to last.
#[inline]
pub(crate) fn pct_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        0.0
    } else {
        (last - first) / first * 100.0
    }
}
