//! Order-tag grammar for bot attribution.
//!
//! Every order a bot places carries the comment
//! `TradePulse_bot_<bot_id>_<MODE>_<DIRECTION>`, which is the only link
//! between a broker-side deal and the bot that produced it. Manual closes
//! use `Manual_Close_<ticket>`.

use crate::types::{Direction, TradeMode};

const TAG_PREFIX: &str = "TradePulse_bot_";

/// A successfully parsed attribution tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTag {
    pub bot_id: u64,
    pub mode: TradeMode,
    pub direction: Direction,
}

/// Build the attribution tag for an order.
pub fn order_tag(bot_id: u64, mode: TradeMode, direction: Direction) -> String {
    format!("{TAG_PREFIX}{bot_id}_{}_{}", mode.as_str(), direction.as_str())
}

/// Tag for a manually closed position, referencing the original ticket.
pub fn manual_close_tag(ticket: u64) -> String {
    format!("Manual_Close_{ticket}")
}

/// Parse an order comment back into its attribution fields.
///
/// Returns `None` for comments that are not TradePulse bot tags, including
/// manual-close tags.
pub fn parse_order_tag(comment: &str) -> Option<ParsedTag> {
    let rest = comment.strip_prefix(TAG_PREFIX)?;

    // Fields from the right: DIRECTION, MODE, then whatever remains is the id.
    let (rest, direction) = rest.rsplit_once('_')?;
    let direction = match direction {
        "BUY" => Direction::Buy,
        "SELL" => Direction::Sell,
        _ => return None,
    };

    let (id, mode) = rest.rsplit_once('_')?;
    let mode = mode.parse::<TradeMode>().ok()?;
    let bot_id = id.parse::<u64>().ok()?;

    Some(ParsedTag {
        bot_id,
        mode,
        direction,
    })
}
