//! Deterministic test strategy.
//!
//! Alternates BUY/SELL on every invocation with a fixed confidence rotation,
//! regardless of window contents. Exists purely to exercise the downstream
//! gates (rate limit, cooldown, protection) with a predictable signal rate.

use tracing::debug;

use pulse_common::{Direction, Quote};

use crate::ticks::TickWindow;

use super::{Signal, TickStrategy};

/// Confidence rotation applied per invocation.
const CONFIDENCE_CYCLE: [f64; 4] = [0.95, 0.85, 0.75, 0.90];

#[derive(Default)]
pub struct AlwaysSignalStrategy {
    invocations: u64,
}

impl AlwaysSignalStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickStrategy for AlwaysSignalStrategy {
    fn name(&self) -> &'static str {
        "always_signal"
    }

    fn evaluate(&mut self, window: &TickWindow, quote: &Quote) -> Option<Signal> {
        self.invocations += 1;

        // Works even for an empty window: the current quote backs the price.
        let price = window
            .last()
            .map(|t| t.mid())
            .unwrap_or_else(|| quote.mid());

        let direction = if self.invocations % 2 == 1 {
            Direction::Buy
        } else {
            Direction::Sell
        };
        let confidence = CONFIDENCE_CYCLE[(self.invocations as usize - 1) % CONFIDENCE_CYCLE.len()];

        debug!(
            strategy = self.name(),
            window = window.len(),
            invocation = self.invocations,
            %direction,
            "emitting test signal"
        );
        Some(Signal::new(
            direction,
            price,
            confidence,
            format!("Always {} #{}", direction, self.invocations),
        ))
    }
}
