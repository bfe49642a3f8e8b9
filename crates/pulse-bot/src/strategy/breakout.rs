//! Range-breakout strategy.
//!
//! Support and resistance are the min/max of the trailing lookback (excluding
//! the current mid); a close beyond the range extended by the relative
//! threshold is a breakout. Closes inside the outer tenth of the range emit
//! the lower-confidence "approaching" variant. Needs at least two mids; a
//! one-tick window has no range to break.

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::config::BreakoutSettings;
use crate::ticks::TickWindow;

use super::{Signal, TickStrategy};

/// Fraction of the range that counts as "approaching" a level.
const APPROACH_BAND: f64 = 0.1;

pub struct BreakoutStrategy {
    cfg: BreakoutSettings,
}

impl BreakoutStrategy {
    pub fn new(cfg: BreakoutSettings) -> Self {
        Self { cfg }
    }
}

impl TickStrategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        let mids = window.mids();
        let n = mids.len();
        let price = mids.last().copied().unwrap_or_else(|| quote.mid());

        if n < 2 {
            debug!(strategy = self.name(), window = n, "window too thin, suppressing");
            return None;
        }

        let lookback = self.cfg.lookback.min(n - 1).max(1);
        let recent = &mids[n - 1 - lookback..n - 1];
        let resistance = recent.iter().copied().fold(f64::MIN, f64::max);
        let support = recent.iter().copied().fold(f64::MAX, f64::min);
        let range = resistance - support;

        let breakout_up = resistance + range * self.cfg.threshold;
        let breakout_down = support - range * self.cfg.threshold;
        debug!(
            strategy = self.name(),
            window = n,
            mode = if n > self.cfg.lookback { "full" } else { "adaptive" },
            support,
            resistance,
            price,
            "evaluated"
        );

        if price > breakout_up {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.8,
                format!("Breakout up ({price:.2} > {breakout_up:.2})"),
            ));
        }
        if price < breakout_down {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.8,
                format!("Breakout down ({price:.2} < {breakout_down:.2})"),
            ));
        }

        // Approaching a level: the outer tenth of the range on either side.
        if range > 0.0 {
            let to_resistance = (resistance - price) / range;
            let to_support = (price - support) / range;
            if to_resistance > 0.0 && to_resistance < APPROACH_BAND {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.65,
                    format!("Approaching resistance ({price:.2} near {resistance:.2})"),
                ));
            }
            if to_support > 0.0 && to_support < APPROACH_BAND {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.65,
                    format!("Approaching support ({price:.2} near {support:.2})"),
                ));
            }
        }

        debug!(strategy = self.name(), "price inside range, suppressing");
        None
    }
}
