//! VWAP mean-reversion strategy.
//!
//! The tick feed carries no volume, so per-tick absolute mid difference
//! stands in as a volume proxy: a tick that moved the price more counts for
//! more weight. Bands are half a standard deviation around the weighted
//! average; a close beyond a band with deviation past the configured
//! threshold fires the band signal, and a close on the wrong side of VWAP
//! moving back toward it fires the reversion variant. Needs two mids.

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::config::VwapSettings;
use crate::ticks::TickWindow;

use super::{sma, std_dev, Signal, TickStrategy};

/// Band half-width in standard deviations.
const BAND_STDDEV: f64 = 0.5;

pub struct VwapStrategy {
    cfg: VwapSettings,
}

impl VwapStrategy {
    pub fn new(cfg: VwapSettings) -> Self {
        Self { cfg }
    }

    /// Volume-weighted average using the absolute-mid-difference proxy.
    fn vwap(recent: &[f64]) -> f64 {
        let mut weighted = 0.0;
        let mut volume_sum = 0.0;
        for (i, &price) in recent.iter().enumerate() {
            let volume = if i == 0 {
                1.0
            } else {
                let change = (price - recent[i - 1]).abs();
                let avg = sma(&recent[..=i]);
                let volatility = if avg > 0.0 { change / avg } else { 0.0 };
                1.0 + volatility * 10.0
            };
            weighted += price * volume;
            volume_sum += volume;
        }
        if volume_sum > 0.0 {
            weighted / volume_sum
        } else {
            0.0
        }
    }
}

impl TickStrategy for VwapStrategy {
    fn name(&self) -> &'static str {
        "vwap"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        let mids = window.mids();
        let n = mids.len();
        let price = mids.last().copied().unwrap_or_else(|| quote.mid());

        if n < 2 {
            debug!(strategy = self.name(), window = n, "window too thin, suppressing");
            return None;
        }

        let period = self.cfg.period.min(n);
        let recent = &mids[n - period..];
        let vwap = Self::vwap(recent);
        if vwap <= 0.0 {
            debug!(strategy = self.name(), window = n, "degenerate VWAP, suppressing");
            return None;
        }

        let deviation = (price - vwap) / vwap * 100.0;
        let band = std_dev(recent) * BAND_STDDEV;
        let upper = vwap + band;
        let lower = vwap - band;
        debug!(
            strategy = self.name(),
            window = n,
            mode = if n >= self.cfg.period { "full" } else { "adaptive" },
            vwap,
            deviation,
            "evaluated"
        );

        if price < lower && deviation < -self.cfg.deviation_threshold {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.75,
                format!("Below VWAP ({price:.2} < {vwap:.2}, {deviation:+.2}%)"),
            ));
        }
        if price > upper && deviation > self.cfg.deviation_threshold {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.75,
                format!("Above VWAP ({price:.2} > {vwap:.2}, {deviation:+.2}%)"),
            ));
        }

        // Reversion: price on one side of VWAP but drifting back.
        if recent.len() >= 3 {
            let trend = recent[recent.len() - 1] - recent[recent.len() - 3];
            if price > vwap && trend < 0.0 {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.65,
                    format!("VWAP reversion from above ({vwap:.2})"),
                ));
            }
            if price < vwap && trend > 0.0 {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.65,
                    format!("VWAP reversion from below ({vwap:.2})"),
                ));
            }
        }

        debug!(strategy = self.name(), "price near VWAP, suppressing");
        None
    }
}
