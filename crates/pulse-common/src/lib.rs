//! Shared types and utilities for the TradePulse HFT controller.
//!
//! This crate contains:
//! - Common market types (Direction, Quote, Tick, SymbolInfo, Position)
//! - Pip and spread math derived from symbol metadata
//! - The order-tag grammar used for bot attribution

pub mod tag;
pub mod types;

pub use tag::{manual_close_tag, order_tag, parse_order_tag, ParsedTag};
pub use types::*;
