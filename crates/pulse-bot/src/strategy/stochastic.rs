//! Stochastic oscillator strategy.
//!
//! %K is computed from the window's rolling high/low/close over an adaptive
//! period; %D is the SMA of a short %K history. Signals fire on both %K and
//! %D clearing the oversold/overbought levels, and on %K/%D crossings away
//! from the midline. Two mids are enough for an adaptive evaluation; a
//! one-tick window yields no signal (high == low carries no information).

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::config::StochasticSettings;
use crate::ticks::TickWindow;

use super::{sma, Signal, TickStrategy};

pub struct StochasticStrategy {
    cfg: StochasticSettings,
}

impl StochasticStrategy {
    pub fn new(cfg: StochasticSettings) -> Self {
        Self { cfg }
    }

    /// %K over the trailing `period` of `mids`: where the close sits inside
    /// the range, 0..100. A flat range reads as the 50 midline.
    fn percent_k(mids: &[f64], period: usize) -> f64 {
        let recent = &mids[mids.len().saturating_sub(period)..];
        let high = recent.iter().copied().fold(f64::MIN, f64::max);
        let low = recent.iter().copied().fold(f64::MAX, f64::min);
        let close = recent[recent.len() - 1];
        if high == low {
            return 50.0;
        }
        (close - low) / (high - low) * 100.0
    }
}

impl TickStrategy for StochasticStrategy {
    fn name(&self) -> &'static str {
        "stochastic"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        let mids = window.mids();
        let n = mids.len();
        let price = mids.last().copied().unwrap_or_else(|| quote.mid());

        if n < 2 {
            debug!(strategy = self.name(), window = n, "window too thin, suppressing");
            return None;
        }

        // Adaptive periods for thin windows.
        let k_period = self.cfg.k_period.min(n).max(3.min(n));
        let d_period = self.cfg.d_period.min((k_period / 2).max(2));

        // %K history over trailing segments, oldest first.
        let segments = d_period.min(n.saturating_sub(k_period) + 1).max(1);
        let mut k_values: Vec<f64> = Vec::with_capacity(segments);
        for i in (0..segments).rev() {
            let end = n - i;
            k_values.push(Self::percent_k(&mids[..end], k_period));
        }

        let current_k = *k_values.last()?;
        let current_d = sma(&k_values[k_values.len().saturating_sub(d_period)..]);
        debug!(
            strategy = self.name(),
            window = n,
            mode = if n >= self.cfg.k_period { "full" } else { "adaptive" },
            k = current_k,
            d = current_d,
            "evaluated"
        );

        if current_k < self.cfg.oversold && current_d < self.cfg.oversold {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.8,
                format!("Stochastic oversold (K {current_k:.1}, D {current_d:.1})"),
            ));
        }
        if current_k > self.cfg.overbought && current_d > self.cfg.overbought {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.8,
                format!("Stochastic overbought (K {current_k:.1}, D {current_d:.1})"),
            ));
        }

        if k_values.len() >= 2 {
            let prev_k = k_values[k_values.len() - 2];
            if prev_k <= current_d && current_k > current_d && current_k < 50.0 {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.7,
                    format!("Stochastic bullish cross (K {current_k:.1} > D {current_d:.1})"),
                ));
            }
            if prev_k >= current_d && current_k < current_d && current_k > 50.0 {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.7,
                    format!("Stochastic bearish cross (K {current_k:.1} < D {current_d:.1})"),
                ));
            }
        }

        debug!(strategy = self.name(), k = current_k, "neutral, suppressing");
        None
    }
}
