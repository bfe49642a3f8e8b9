//! Dual moving-average strategy.
//!
//! Full mode compares a fast and slow SMA (periods adapt downward for thin
//! windows) and demands the last mid confirm the trend side. When the two
//! averages sit within the configured proximity band a lower-confidence
//! near-cross signal fires in the direction of the last delta. The two-tick
//! branch falls back to momentum sign, and the one-tick branch is a frozen
//! parity map on the mid's hundredths digit.

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::config::MovingAverageSettings;
use crate::ticks::TickWindow;

use super::{pct_change, sma, Signal, TickStrategy};

/// Minimum |percent change| for the two-tick momentum branch.
const MOMENTUM_MIN_PCT: f64 = 0.01;

pub struct MovingAverageStrategy {
    cfg: MovingAverageSettings,
}

impl MovingAverageStrategy {
    pub fn new(cfg: MovingAverageSettings) -> Self {
        Self { cfg }
    }

    /// One-tick fallback: hundredths digit 0-4 buys, 5-9 sells. Deterministic
    /// so downstream gate tests are reproducible.
    fn one_tick_signal(price: f64) -> Signal {
        let digit = ((price * 100.0).round() as i64).rem_euclid(10);
        let direction = if digit <= 4 {
            Direction::Buy
        } else {
            Direction::Sell
        };
        Signal::new(
            direction,
            price,
            0.70,
            format!("MA single-price parity ({price:.2})"),
        )
    }
}

impl TickStrategy for MovingAverageStrategy {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        let mids = window.mids();
        let n = mids.len();
        let price = mids.last().copied().unwrap_or_else(|| quote.mid());

        if n == 0 {
            debug!(strategy = self.name(), window = n, "no data, suppressing");
            return None;
        }

        if n == 1 {
            debug!(strategy = self.name(), window = n, mode = "one-tick", price, "evaluated");
            return Some(Self::one_tick_signal(price));
        }

        if n == 2 {
            let change = pct_change(mids[0], mids[1]);
            debug!(strategy = self.name(), window = n, mode = "momentum", change, "evaluated");
            if change > MOMENTUM_MIN_PCT {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.65,
                    format!("MA momentum up ({change:+.3}%)"),
                ));
            }
            if change < -MOMENTUM_MIN_PCT {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.65,
                    format!("MA momentum down ({change:+.3}%)"),
                ));
            }
            return None;
        }

        // Adaptive periods keep fast < slow even on short windows.
        let fast_period = self.cfg.ma_fast_period.min((n / 2).max(1));
        let mut slow_period = self.cfg.ma_slow_period.min(n - 1).max(2);
        let fast_period = if fast_period >= slow_period {
            slow_period.saturating_sub(1).max(1)
        } else {
            fast_period
        };
        if slow_period <= fast_period {
            slow_period = fast_period + 1;
        }

        let fast = sma(&mids[n - fast_period..]);
        let slow = sma(&mids[n.saturating_sub(slow_period)..]);
        debug!(
            strategy = self.name(),
            window = n,
            mode = "full",
            fast,
            slow,
            price,
            "evaluated"
        );

        if fast > slow && price > fast {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.75,
                format!("MA bullish (fast {fast:.2} > slow {slow:.2}, price above)"),
            ));
        }
        if fast < slow && price < fast {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.75,
                format!("MA bearish (fast {fast:.2} < slow {slow:.2}, price below)"),
            ));
        }

        // Near-cross: averages within the proximity band of each other.
        if (fast - slow).abs() <= price * self.cfg.proximity_pct {
            let last_delta = mids[n - 1] - mids[n - 2];
            if last_delta != 0.0 {
                let direction = if last_delta > 0.0 {
                    Direction::Buy
                } else {
                    Direction::Sell
                };
                return Some(Signal::new(
                    direction,
                    price,
                    0.60,
                    format!("MA near-cross (gap {:.4})", (fast - slow).abs()),
                ));
            }
        }

        debug!(strategy = self.name(), "no trend alignment, suppressing");
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

    fn strategy() -> MovingAverageStrategy {
        MovingAverageStrategy::new(MovingAverageSettings::default())
    }

    #[test]
    fn test_one_tick_parity_map() {
        // Hundredths digit 3 -> BUY.
        let sig = MovingAverageStrategy::one_tick_signal(4300.13);
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.70).abs() < 1e-9);

        // Hundredths digit 7 -> SELL.
        let sig = MovingAverageStrategy::one_tick_signal(4300.17);
        assert_eq!(sig.direction, Direction::Sell);
    }

    #[test]
    fn test_single_tick_window_total() {
        let mut s = strategy();
        let q = quote(4300.10, 4300.16); // mid 4300.13
        let window = TickWindow::from_quote(&q);
        assert!(s.evaluate(&window, &q).is_some());
    }

    #[test]
    fn test_two_tick_momentum_sign() {
        let mut s = strategy();
        let window = window_from_mids(&[4300.0, 4302.0]); // +0.047%
        let sig = s.evaluate(&window, &quote(4302.0, 4302.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);

        let window = window_from_mids(&[4302.0, 4300.0]);
        let sig = s.evaluate(&window, &quote(4300.0, 4300.5)).unwrap();
        assert_eq!(sig.direction, Direction::Sell);

        // Sub-threshold move stays quiet.
        let window = window_from_mids(&[4300.00, 4300.10]);
        assert!(s.evaluate(&window, &quote(4300.0, 4300.2)).is_none());
    }

    #[test]
    fn test_trend_alignment_buys() {
        let mut s = strategy();
        // Steady uptrend: fast above slow, price above fast.
        let mids: Vec<f64> = (0..12).map(|i| 4300.0 + i as f64).collect();
        let window = window_from_mids(&mids);
        let sig = s.evaluate(&window, &quote(4311.0, 4311.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_trend_alignment_sells() {
        let mut s = strategy();
        let mids: Vec<f64> = (0..12).map(|i| 4311.0 - i as f64).collect();
        let window = window_from_mids(&mids);
        let sig = s.evaluate(&window, &quote(4300.0, 4300.5)).unwrap();
        assert_eq!(sig.direction, Direction::Sell);
    }

    #[test]
    fn test_near_cross_reduced_confidence() {
        let mut s = strategy();
        // Pullback inside a fading downtrend: fast < slow but price sits
        // above the fast average, so neither trend branch fires; the averages
        // are within the proximity band and the last delta is positive ->
        // near-cross BUY at 0.60.
        let mids = [
            4300.4, 4300.4, 4300.4, 4300.4, 4300.4, 4300.4, 4300.4, 4300.4, 4300.0, 4300.0,
            4300.35,
        ];
        let window = window_from_mids(&mids);
        let sig = s.evaluate(&window, &quote(4300.3, 4300.4)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.60).abs() < 1e-9);
    }
}
