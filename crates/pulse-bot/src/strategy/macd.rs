//! MACD strategy.
//!
//! Full mode needs `slow + signal_period` mids: it computes the MACD line
//! from fast/slow EMAs, rebuilds a short MACD history over trailing prefixes
//! to form the signal line, and emits on line/signal crosses. With too little
//! history for the signal line it falls back to zero-line momentum
//! (|line| > 0.1). Reduced mode shrinks the EMA periods to 3/5 and emits on
//! the sign of the shrunk line, so any window of three or more mids yields a
//! signal unless the window is perfectly flat; a two-mid window degrades to
//! plain momentum sign.

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::config::MacdSettings;
use crate::ticks::TickWindow;

use super::{ema, Signal, TickStrategy};

/// Zero-line threshold for the no-signal-line fallback.
const ZERO_LINE_THRESHOLD: f64 = 0.1;

pub struct MacdStrategy {
    cfg: MacdSettings,
}

impl MacdStrategy {
    pub fn new(cfg: MacdSettings) -> Self {
        Self { cfg }
    }

    fn macd_line(&self, mids: &[f64], fast: usize, slow: usize) -> f64 {
        let fast_ema = ema(&mids[mids.len().saturating_sub(fast)..], fast);
        let slow_ema = ema(&mids[mids.len().saturating_sub(slow)..], slow);
        fast_ema - slow_ema
    }
}

impl TickStrategy for MacdStrategy {
    fn name(&self) -> &'static str {
        "macd_strategy"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        let mids = window.mids();
        let n = mids.len();
        let price = mids.last().copied().unwrap_or_else(|| quote.mid());

        if n < 2 {
            debug!(strategy = self.name(), window = n, "window too thin, suppressing");
            return None;
        }

        let full_needed = (self.cfg.slow + self.cfg.signal_period).max(10);

        if n < full_needed {
            // Reduced mode: shrunk EMA periods, sign of the line decides.
            let fast = 3.min((n / 2).max(2));
            let slow = 5.min((n - 1).max(3));

            if fast < slow && n >= slow {
                let line = self.macd_line(&mids, fast, slow);
                debug!(
                    strategy = self.name(),
                    window = n,
                    mode = "reduced",
                    line,
                    "evaluated"
                );
                if line > 0.0 {
                    return Some(Signal::new(
                        Direction::Buy,
                        price,
                        0.65,
                        format!("MACD bullish, reduced ({line:+.4})"),
                    ));
                }
                if line < 0.0 {
                    return Some(Signal::new(
                        Direction::Sell,
                        price,
                        0.65,
                        format!("MACD bearish, reduced ({line:+.4})"),
                    ));
                }
            }

            // Momentum of the last delta when even the shrunk EMAs are flat
            // or infeasible.
            let momentum = mids[n - 1] - mids[n - 2];
            debug!(
                strategy = self.name(),
                window = n,
                mode = "momentum",
                momentum,
                "evaluated"
            );
            if momentum > 0.0 {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.5,
                    format!("MACD momentum up ({momentum:+.2})"),
                ));
            }
            if momentum < 0.0 {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.5,
                    format!("MACD momentum down ({momentum:+.2})"),
                ));
            }
            if n >= 3 {
                // Loose-threshold guarantee for three or more mids: a
                // perfectly flat tail still reports as (weak) bullish.
                return Some(Signal::new(Direction::Buy, price, 0.5, "MACD flat window"));
            }
            return None;
        }

        // Full mode.
        let line = self.macd_line(&mids, self.cfg.fast, self.cfg.slow);

        // Rebuild a short MACD history over trailing prefixes for the signal
        // line.
        let mut history: Vec<f64> = Vec::with_capacity(self.cfg.signal_period);
        for i in 0..self.cfg.signal_period {
            let end = n - (self.cfg.signal_period - 1 - i);
            history.push(self.macd_line(&mids[..end], self.cfg.fast, self.cfg.slow));
        }

        if history.len() < 2 {
            debug!(strategy = self.name(), window = n, mode = "full", line, "no signal history");
            if line > ZERO_LINE_THRESHOLD {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.7,
                    format!("MACD above zero line ({line:+.4})"),
                ));
            }
            if line < -ZERO_LINE_THRESHOLD {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.7,
                    format!("MACD below zero line ({line:+.4})"),
                ));
            }
            return None;
        }

        let signal_line = ema(&history, self.cfg.signal_period);
        let prev = history[history.len() - 2];
        debug!(
            strategy = self.name(),
            window = n,
            mode = "full",
            line,
            signal_line,
            prev,
            "evaluated"
        );

        if prev <= signal_line && line > signal_line {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.8,
                format!("MACD bullish cross ({line:+.4} > {signal_line:+.4})"),
            ));
        }
        if prev >= signal_line && line < signal_line {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.8,
                format!("MACD bearish cross ({line:+.4} < {signal_line:+.4})"),
            ));
        }

        // No cross: fall back to zero-line momentum.
        if line > ZERO_LINE_THRESHOLD {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.7,
                format!("MACD above zero line ({line:+.4})"),
            ));
        }
        if line < -ZERO_LINE_THRESHOLD {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.7,
                format!("MACD below zero line ({line:+.4})"),
            ));
        }

        debug!(strategy = self.name(), line, "neutral, suppressing");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks::RawTick;
    use chrono::{DateTime, Utc};

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote {
            bid,
            ask,
            time: Utc::now(),
        }
    }

    fn window_from_mids(mids: &[f64]) -> TickWindow {
        let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let raw: Vec<RawTick> = mids
            .iter()
            .enumerate()
            .map(|(i, &m)| RawTick::quote(m, m, base + chrono::Duration::seconds(i as i64)))
            .collect();
        TickWindow::from_raw(&raw, 0.0, base)
    }

    fn strategy() -> MacdStrategy {
        MacdStrategy::new(MacdSettings::default())
    }

    #[test]
    fn test_one_tick_suppresses_quietly() {
        let mut s = strategy();
        let q = quote(4300.0, 4300.5);
        let window = TickWindow::from_quote(&q);
        // Total over a one-element window: no signal, but no error either.
        assert!(s.evaluate(&window, &q).is_none());
    }

    #[test]
    fn test_two_tick_momentum() {
        let mut s = strategy();
        let window = window_from_mids(&[4300.0, 4301.0]);
        let sig = s.evaluate(&window, &quote(4301.0, 4301.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reduced_mode_always_signals_at_three() {
        let mut s = strategy();
        // Rising window -> reduced line positive -> BUY.
        let window = window_from_mids(&[4300.0, 4301.0, 4302.0, 4303.0, 4304.0]);
        let sig = s.evaluate(&window, &quote(4304.0, 4304.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.65).abs() < 1e-9);

        // Falling window -> SELL.
        let window = window_from_mids(&[4304.0, 4303.0, 4302.0, 4301.0, 4300.0]);
        let sig = s.evaluate(&window, &quote(4300.0, 4300.5)).unwrap();
        assert_eq!(sig.direction, Direction::Sell);

        // Perfectly flat three-mid window still yields the loose-threshold
        // signal.
        let window = window_from_mids(&[4300.0, 4300.0, 4300.0]);
        let sig = s.evaluate(&window, &quote(4300.0, 4300.5)).unwrap();
        assert!((sig.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_full_mode_trend_emits() {
        let mut s = strategy();
        // 40 mids trending up strongly: line well above both the zero line
        // and threshold.
        let mids: Vec<f64> = (0..40).map(|i| 4300.0 + i as f64 * 2.0).collect();
        let window = window_from_mids(&mids);
        let sig = s.evaluate(&window, &quote(4378.0, 4378.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!(sig.confidence >= 0.7);
    }

    #[test]
    fn test_full_mode_flat_suppresses() {
        let mut s = strategy();
        let mids = vec![4300.0; 40];
        let window = window_from_mids(&mids);
        assert!(s.evaluate(&window, &quote(4300.0, 4300.5)).is_none());
    }
}
