//! End-to-end tests: supervisor -> bot loop -> strategy -> gates -> executor
//! against the in-memory Market Access mock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::timeout;

use pulse_bot::{
    BotConfig, BotEvent, BotStatus, FillingMode, MockMarket, SkipReason, Supervisor,
};
use pulse_common::{Direction, Quote};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_bot=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Base config for a fast test loop: one-second cycles, gates wide open.
fn fast_config(strategy: &str) -> BotConfig {
    let mut cfg = BotConfig::default();
    cfg.strategy_name = strategy.to_string();
    cfg.analysis_interval_secs = 1;
    cfg.tick_lookback_secs = 30;
    cfg.min_signal_confidence = 0.0;
    cfg.cooldown_secs_after_trade = 0;
    cfg.max_orders_per_minute = 100;
    cfg.max_daily_trades = 1000;
    cfg.max_consecutive_losses = 100;
    cfg.max_consecutive_profits = 100;
    cfg.max_loss_threshold = 1_000_000.0;
    cfg.max_profit_threshold = 1_000_000.0;
    cfg.enable_spread_filter = false;
    cfg
}

/// Wait until an event matching the predicate arrives.
async fn wait_for(
    rx: &mut broadcast::Receiver<BotEvent>,
    secs: u64,
    mut pred: impl FnMut(&BotEvent) -> bool,
) -> Option<BotEvent> {
    timeout(Duration::from_secs(secs), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if pred(&event) {
                        return event;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event channel closed while waiting")
                }
            }
        }
    })
    .await
    .ok()
}

// =============================================================================
// S1: one-tick RSI fallback drives a full order
// =============================================================================

#[tokio::test]
async fn test_one_tick_rsi_fallback_places_order() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    // Every history rung fails: the window is synthesized from the quote.
    mock.fail_tick_queries(true);

    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let mut cfg = fast_config("rsi_strategy");
    cfg.min_signal_confidence = 0.5;
    cfg.use_manual_sl_tp = true;
    cfg.stop_loss_pips = 20.0;
    cfg.take_profit_pips = 40.0;
    let bot_id = sup.start(cfg).await.unwrap();
    assert_eq!(bot_id, 1);

    let event = wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::TradeExecuted { .. })
    })
    .await
    .expect("a one-tick window must still produce a trade");

    // Quote (4300.00 / 4300.50): mid 4300.25 maps to the oversold branch,
    // so the signal is a BUY entered at the ask with 20/40 pip stops
    // (pip size 0.01).
    let BotEvent::TradeExecuted {
        direction,
        entry_price,
        sl_price,
        tp_price,
        ..
    } = event
    else {
        unreachable!()
    };
    assert_eq!(direction, Direction::Buy);
    assert!((entry_price - 4300.50).abs() < 1e-9);
    assert!((sl_price - 4300.30).abs() < 1e-9);
    assert!((tp_price - 4300.90).abs() < 1e-9);

    let sent = mock.sent_orders();
    assert_eq!(sent[0].comment, "TradePulse_bot_1_HFT_BUY");

    sup.stop(bot_id).await.unwrap();
}

// =============================================================================
// S2: spread gate suppresses the cycle
// =============================================================================

#[tokio::test]
async fn test_spread_gate_blocks_submission() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    // 200-point spread at point size 0.01.
    mock.set_quote(Quote {
        bid: 4300.00,
        ask: 4302.00,
        time: Utc::now(),
    });

    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let mut cfg = fast_config("always_signal");
    cfg.enable_spread_filter = true;
    cfg.symbol_spread_limit = Some(100);
    let bot_id = sup.start(cfg).await.unwrap();

    let event = wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::CycleSkipped { .. })
    })
    .await
    .expect("spread gate must emit telemetry");

    let BotEvent::CycleSkipped { reason, .. } = event else {
        unreachable!()
    };
    assert_eq!(
        reason,
        SkipReason::SpreadTooWide {
            spread_points: 200,
            limit_points: 100
        }
    );
    assert_eq!(mock.sent_order_count(), 0);

    sup.stop(bot_id).await.unwrap();
}

// =============================================================================
// S3: rolling-minute rate limit
// =============================================================================

#[tokio::test]
async fn test_rate_limit_caps_executions() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let mut cfg = fast_config("always_signal");
    cfg.max_orders_per_minute = 2;
    let bot_id = sup.start(cfg).await.unwrap();

    // Let roughly five one-second cycles run, well inside the 60s window.
    tokio::time::sleep(Duration::from_millis(4600)).await;
    sup.stop(bot_id).await.unwrap();

    let mut executed = 0;
    let mut rate_limited = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            BotEvent::TradeExecuted { .. } => executed += 1,
            BotEvent::CycleSkipped {
                reason: SkipReason::RateLimited { .. },
                ..
            } => rate_limited += 1,
            _ => {}
        }
    }
    assert_eq!(executed, 2, "exactly two orders fit the rolling minute");
    assert!(rate_limited >= 1, "later cycles must report the rate gate");
    assert_eq!(mock.sent_order_count(), 2);
}

// =============================================================================
// S4: consecutive-loss protection pause, manual resume only
// =============================================================================

#[tokio::test]
async fn test_consecutive_losses_pause_bot() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let mut cfg = fast_config("always_signal");
    cfg.max_consecutive_losses = 3;
    let bot_id = sup.start(cfg).await.unwrap();

    // Three losing completions routed back through the attribution tag.
    let tag = format!("TradePulse_bot_{bot_id}_HFT_BUY");
    for ticket in 1..=3u64 {
        let routed = sup.route_completion(&tag, ticket, -5.0).await;
        assert_eq!(routed, Some(bot_id));
    }

    wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::ProtectionPaused { .. })
    })
    .await
    .expect("third loss must trip the streak gate");

    let details = sup.get_details(bot_id).unwrap();
    assert_eq!(details.status, BotStatus::PausedProtection);
    assert_eq!(details.performance.consecutive_losses, 3);

    // Paused: signals keep flowing but nothing is submitted, and the pause
    // does not lift by itself.
    let before = mock.sent_order_count();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(mock.sent_order_count(), before);
    assert_eq!(
        sup.get_details(bot_id).unwrap().status,
        BotStatus::PausedProtection
    );

    // Manual operator resume re-opens submissions.
    sup.resume(bot_id).await.unwrap();
    wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::TradeExecuted { .. })
    })
    .await
    .expect("resumed bot must trade again");

    sup.stop(bot_id).await.unwrap();
}

#[tokio::test]
async fn test_pause_outranks_spread_gate() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    // Permanently wide spread: 200 points at point size 0.01.
    mock.set_quote(Quote {
        bid: 4300.00,
        ask: 4302.00,
        time: Utc::now(),
    });

    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let mut cfg = fast_config("always_signal");
    cfg.enable_spread_filter = true;
    cfg.symbol_spread_limit = Some(100);
    cfg.max_consecutive_losses = 1;
    let bot_id = sup.start(cfg).await.unwrap();

    // Running: the spread gate is what suppresses the cycle.
    wait_for(&mut events, 10, |e| {
        matches!(
            e,
            BotEvent::CycleSkipped {
                reason: SkipReason::SpreadTooWide { .. },
                ..
            }
        )
    })
    .await
    .expect("running bot must report the spread gate");

    // One routed loss trips the streak gate.
    let tag = format!("TradePulse_bot_{bot_id}_HFT_BUY");
    sup.route_completion(&tag, 1, -5.0).await;
    wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::ProtectionPaused { .. })
    })
    .await
    .expect("loss must pause the bot");

    // Paused: the status gate outranks the spread gate, so every skip after
    // the pause reports the pause even though the spread is still wide.
    let event = wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::CycleSkipped { .. })
    })
    .await
    .expect("paused bot keeps publishing cycle telemetry");
    let BotEvent::CycleSkipped { reason, .. } = event else {
        unreachable!()
    };
    assert_eq!(reason, SkipReason::ProtectionPaused);

    sup.stop(bot_id).await.unwrap();
}

// =============================================================================
// S5: unsupported filling mode retries with the next mode
// =============================================================================

#[tokio::test]
async fn test_filling_mode_retry_succeeds_once() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    mock.push_rejection(pulse_bot::retcode::UNSUPPORTED_FILLING);

    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let bot_id = sup.start(fast_config("always_signal")).await.unwrap();

    wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::TradeExecuted { .. })
    })
    .await
    .expect("second filling mode must fill");
    sup.stop(bot_id).await.unwrap();

    let sent = mock.sent_orders();
    assert!(sent.len() >= 2);
    assert_eq!(sent[0].filling, FillingMode::Ioc);
    assert_eq!(sent[1].filling, FillingMode::Fok);

    // One executed trade, no trade_error.
    let mut executed = 0;
    let mut errors = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            BotEvent::TradeExecuted { .. } => executed += 1,
            BotEvent::TradeError { .. } => errors += 1,
            _ => {}
        }
    }
    assert_eq!(errors, 0);
    // The retry pair counts as a single execution.
    assert!(executed >= 1);
}

// =============================================================================
// S6: attribution round trip updates the owner's counters
// =============================================================================

#[tokio::test]
async fn test_attribution_routes_completion_to_owner() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    // Burn ids so the bot under test is not bot 1.
    for _ in 0..6 {
        let id = sup.start(fast_config("always_signal")).await.unwrap();
        sup.stop(id).await.unwrap();
    }
    let bot_id = sup.start(fast_config("always_signal")).await.unwrap();
    assert_eq!(bot_id, 7);

    let event = wait_for(&mut events, 10, |e| {
        matches!(
            e,
            BotEvent::TradeExecuted {
                bot_id: 7,
                direction: Direction::Buy,
                ..
            }
        )
    })
    .await
    .expect("first always-signal invocation is a BUY");
    let BotEvent::TradeExecuted { ticket, .. } = event else {
        unreachable!()
    };

    // The order the broker saw carries the attribution tag for bot 7.
    let comment = "TradePulse_bot_7_HFT_BUY".to_string();
    assert!(
        mock.sent_orders().iter().any(|o| o.comment == comment),
        "bot 7's BUY must carry its tag"
    );

    // A later sweep over completed deals routes the profit back by tag.
    let routed = sup.route_completion(&comment, ticket, 2.5).await;
    assert_eq!(routed, Some(bot_id));

    let completed = wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::TradeCompleted { .. })
    })
    .await
    .expect("completion event must follow routing");
    let BotEvent::TradeCompleted {
        bot_id: owner,
        profit,
        ..
    } = completed
    else {
        unreachable!()
    };
    assert_eq!(owner, bot_id);
    assert!((profit - 2.5).abs() < 1e-9);

    // The owner's counters absorbed the completion.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let details = sup.get_details(bot_id).unwrap();
        if details.performance.trades_today >= 1 {
            assert!(details.performance.total_trades >= 1);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "trades_today never updated"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    sup.stop(bot_id).await.unwrap();
}

// =============================================================================
// Resilience: tick ladder exhaustion and recovery
// =============================================================================

#[tokio::test]
async fn test_market_data_outage_skips_and_recovers() {
    init_tracing();
    let mock = Arc::new(MockMarket::with_eth_defaults());
    // Invalid quote plus failing history: nothing to synthesize from.
    mock.set_quote(Quote {
        bid: 0.0,
        ask: 0.0,
        time: Utc::now(),
    });
    mock.fail_tick_queries(true);

    let sup = Supervisor::new(mock.clone());
    let mut events = sup.subscribe();

    let bot_id = sup.start(fast_config("always_signal")).await.unwrap();

    wait_for(&mut events, 10, |e| {
        matches!(
            e,
            BotEvent::CycleSkipped {
                reason: SkipReason::MarketDataUnavailable,
                ..
            }
        )
    })
    .await
    .expect("outage must degrade to a skipped cycle");
    assert_eq!(mock.sent_order_count(), 0);

    // Feed returns: the loop recovers without a restart.
    mock.set_quote(Quote {
        bid: 4300.00,
        ask: 4300.50,
        time: Utc::now(),
    });
    wait_for(&mut events, 10, |e| {
        matches!(e, BotEvent::TradeExecuted { .. })
    })
    .await
    .expect("loop must keep running after the outage");

    sup.stop(bot_id).await.unwrap();
}
