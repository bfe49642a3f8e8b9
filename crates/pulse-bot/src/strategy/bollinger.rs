//! Bollinger band strategy.
//!
//! Full mode needs `period` mids: SMA plus/minus `deviation` standard
//! deviations, buying the lower band touch and selling the upper. Smaller
//! windows fall back to a z-score against the whole window's mean at one
//! standard deviation, which keeps the distance-from-mean behavior without
//! pretending the band estimate is stable. One tick has no dispersion and
//! stays quiet.

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::config::BollingerSettings;
use crate::ticks::TickWindow;

use super::{sma, std_dev, Signal, TickStrategy};

pub struct BollingerStrategy {
    cfg: BollingerSettings,
}

impl BollingerStrategy {
    pub fn new(cfg: BollingerSettings) -> Self {
        Self { cfg }
    }
}

impl TickStrategy for BollingerStrategy {
    fn name(&self) -> &'static str {
        "bollinger_bands"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        let mids = window.mids();
        let n = mids.len();
        let price = mids.last().copied().unwrap_or_else(|| quote.mid());

        if n < 2 {
            debug!(strategy = self.name(), window = n, "window too thin, suppressing");
            return None;
        }

        if n >= self.cfg.period {
            let recent = &mids[n - self.cfg.period..];
            let mean = sma(recent);
            let sd = std_dev(recent);
            let upper = mean + self.cfg.deviation * sd;
            let lower = mean - self.cfg.deviation * sd;
            debug!(
                strategy = self.name(),
                window = n,
                mode = "full",
                mean,
                upper,
                lower,
                price,
                "evaluated"
            );

            if sd > 0.0 && price <= lower {
                return Some(Signal::new(
                    Direction::Buy,
                    price,
                    0.75,
                    format!("Lower band touch ({price:.2} <= {lower:.2})"),
                ));
            }
            if sd > 0.0 && price >= upper {
                return Some(Signal::new(
                    Direction::Sell,
                    price,
                    0.75,
                    format!("Upper band touch ({price:.2} >= {upper:.2})"),
                ));
            }

            debug!(strategy = self.name(), "inside bands, suppressing");
            return None;
        }

        // Reduced mode: z-score against the whole window.
        let mean = sma(&mids);
        let sd = std_dev(&mids);
        if sd <= 0.0 {
            debug!(strategy = self.name(), window = n, mode = "reduced", "flat window, suppressing");
            return None;
        }
        let z = (price - mean) / sd;
        debug!(strategy = self.name(), window = n, mode = "reduced", z, "evaluated");

        if z <= -1.0 {
            return Some(Signal::new(
                Direction::Buy,
                price,
                0.65,
                format!("Below window mean (z {z:+.2})"),
            ));
        }
        if z >= 1.0 {
            return Some(Signal::new(
                Direction::Sell,
                price,
                0.65,
                format!("Above window mean (z {z:+.2})"),
            ));
        }
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

    fn strategy() -> BollingerStrategy {
        BollingerStrategy::new(BollingerSettings::default())
    }

    #[test]
    fn test_one_tick_suppresses_quietly() {
        let mut s = strategy();
        let q = quote(4300.0, 4300.5);
        let window = TickWindow::from_quote(&q);
        assert!(s.evaluate(&window, &q).is_none());
    }

    #[test]
    fn test_lower_band_touch_buys() {
        let mut s = strategy();
        // 19 mids oscillating tightly, then a plunge through the lower band.
        let mut mids: Vec<f64> = (0..19)
            .map(|i| if i % 2 == 0 { 4300.0 } else { 4301.0 })
            .collect();
        mids.push(4290.0);
        let window = window_from_mids(&mids);
        let sig = s.evaluate(&window, &quote(4290.0, 4290.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_upper_band_touch_sells() {
        let mut s = strategy();
        let mut mids: Vec<f64> = (0..19)
            .map(|i| if i % 2 == 0 { 4300.0 } else { 4301.0 })
            .collect();
        mids.push(4311.0);
        let window = window_from_mids(&mids);
        let sig = s.evaluate(&window, &quote(4311.0, 4311.5)).unwrap();
        assert_eq!(sig.direction, Direction::Sell);
    }

    #[test]
    fn test_inside_bands_suppresses() {
        let mut s = strategy();
        let mids: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 4300.0 } else { 4301.0 })
            .collect();
        let window = window_from_mids(&mids);
        assert!(s.evaluate(&window, &quote(4300.5, 4301.0)).is_none());
    }

    #[test]
    fn test_reduced_zscore() {
        let mut s = strategy();
        // Five mids, last well below the mean -> reduced-mode BUY.
        let window = window_from_mids(&[4305.0, 4305.0, 4305.0, 4305.0, 4295.0]);
        let sig = s.evaluate(&window, &quote(4295.0, 4295.5)).unwrap();
        assert_eq!(sig.direction, Direction::Buy);
        assert!((sig.confidence - 0.65).abs() < 1e-9);
    }
}
