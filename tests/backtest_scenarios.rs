//! End-to-end backtest scenarios through the public engine entry points,
//! driven by a scripted candle tape.

use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sigtrade::application::engine::Engine;
use sigtrade::config::Config;
use sigtrade::domain::schema::{
    ExchangeSchema, FrameSchema, SignalCallback, StrategyCallbacks, StrategySchema,
};
use sigtrade::domain::types::{
    Candle, CloseReason, MS_PER_MINUTE, Position, SignalProposal, TickOutcome,
};
use sigtrade::infrastructure::mock::MockCandleSource;

fn t0() -> i64 {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
        .unwrap()
        .timestamp_millis()
}

fn minute(i: i64) -> i64 {
    t0() + i * MS_PER_MINUTE
}

fn frame(minutes: i64) -> FrameSchema {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    FrameSchema {
        frame_name: "window".to_string(),
        interval_minutes: 1,
        start_date: start,
        end_date: start + chrono::Duration::minutes(minutes),
    }
}

/// Generator that pops one queue entry per invocation.
fn scripted(proposals: Vec<Option<SignalProposal>>) -> SignalCallback {
    let queue = Arc::new(Mutex::new(VecDeque::from(proposals)));
    Arc::new(move |_symbol, _now| {
        let queue = Arc::clone(&queue);
        Box::pin(async move { Ok(queue.lock().unwrap().pop_front().flatten()) })
    })
}

async fn engine_with(
    tape: Vec<Candle>,
    proposals: Vec<Option<SignalProposal>>,
    frame_minutes: i64,
) -> Engine {
    let mut config = Config::default();
    config.persist_dir = std::env::temp_dir().join("sigtrade-backtest-tests");
    let engine = Engine::new(config);

    engine
        .register_exchange(ExchangeSchema {
            exchange_name: "mock".to_string(),
            source: Arc::new(MockCandleSource::new(tape)),
        })
        .await
        .unwrap();
    engine
        .register_strategy(StrategySchema {
            strategy_name: "scripted".to_string(),
            interval_minutes: 1,
            get_signal: scripted(proposals),
            risk_name: None,
            callbacks: StrategyCallbacks::default(),
        })
        .await
        .unwrap();
    engine.register_frame(frame(frame_minutes)).await.unwrap();
    engine
}

async fn collect_closed(
    mut rx: tokio::sync::mpsc::Receiver<TickOutcome>,
) -> Vec<(CloseReason, f64, f64)> {
    let mut closes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        if let TickOutcome::Closed {
            reason,
            price_close,
            pnl,
            ..
        } = outcome
        {
            closes.push((reason, price_close, pnl.pnl_percent));
        }
    }
    closes
}

fn lifecycle_kinds(events: &mut tokio::sync::mpsc::Receiver<sigtrade::domain::events::SignalEvent>) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event.kind() {
            "scheduled" | "opened" | "closed" | "cancelled" => kinds.push(event.kind().to_string()),
            _ => {}
        }
    }
    kinds
}

/// Scheduled long entry that activates on a dip and runs to take profit.
#[tokio::test]
async fn scheduled_long_reaches_take_profit() {
    let mut tape = Vec::new();
    // Market context above the limit entry.
    tape.extend(MockCandleSource::flat_run(minute(-5), 43_100.0, 10));
    // Five minutes hovering just above the entry.
    for i in 5..10 {
        tape.push(Candle {
            timestamp: minute(i),
            open: 43_000.0,
            high: 43_000.0,
            low: 42_900.0,
            close: 42_950.0,
            volume: 1.0,
        });
    }
    // The dip that fills the limit without touching the stop.
    tape.push(Candle {
        timestamp: minute(10),
        open: 42_900.0,
        high: 42_900.0,
        low: 41_900.0,
        close: 42_100.0,
        volume: 1.0,
    });
    // The rally through the take profit.
    tape.push(Candle {
        timestamp: minute(11),
        open: 42_200.0,
        high: 43_050.0,
        low: 42_200.0,
        close: 43_000.0,
        volume: 1.0,
    });
    tape.extend(MockCandleSource::flat_run(minute(12), 43_000.0, 10));

    let proposal = SignalProposal {
        position: Position::Long,
        price_open: 42_000.0,
        price_take_profit: 43_000.0,
        price_stop_loss: 41_000.0,
        minute_estimated_time: 60,
        note: None,
    };
    let engine = engine_with(tape, vec![Some(proposal)], 20).await;
    let mut events = engine.subscribe().await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    assert_eq!(closes.len(), 1);
    let (reason, price_close, pnl_percent) = closes[0];
    assert_eq!(reason, CloseReason::TakeProfit);
    assert!((price_close - 43_000.0).abs() < 1e-9);

    let open_eff = 42_000.0 * 1.001;
    let close_eff = 43_000.0 * 0.999;
    let expected = (close_eff - open_eff) / open_eff * 100.0 - 0.2;
    assert!((pnl_percent - expected).abs() < 1e-9);

    let kinds = lifecycle_kinds(&mut events);
    assert_eq!(kinds, vec!["scheduled", "opened", "closed"]);
}

/// Immediate short stopped out above the entry.
#[tokio::test]
async fn short_closes_by_stop_loss() {
    let mut tape = MockCandleSource::flat_run(minute(-5), 50_000.0, 10);
    tape.push(Candle {
        timestamp: minute(5),
        open: 50_200.0,
        high: 51_050.0,
        low: 50_100.0,
        close: 51_000.0,
        volume: 1.0,
    });
    tape.extend(MockCandleSource::flat_run(minute(6), 51_000.0, 10));

    let proposal = SignalProposal {
        position: Position::Short,
        price_open: 50_000.0,
        price_take_profit: 49_000.0,
        price_stop_loss: 51_000.0,
        minute_estimated_time: 60,
        note: None,
    };
    let engine = engine_with(tape, vec![Some(proposal)], 15).await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    assert_eq!(closes.len(), 1);
    let (reason, price_close, pnl_percent) = closes[0];
    assert_eq!(reason, CloseReason::StopLoss);
    assert!((price_close - 51_000.0).abs() < 1e-9);

    let open_eff = 50_000.0 * 0.999;
    let close_eff = 51_000.0 * 1.001;
    let expected = (open_eff - close_eff) / open_eff * 100.0 - 0.2;
    assert!((pnl_percent - expected).abs() < 1e-9);
}

/// The stop is hit before the limit fills: the entry is rejected and no
/// position ever exists.
#[tokio::test]
async fn scheduled_long_cancelled_by_stop_before_activation() {
    let mut tape = MockCandleSource::flat_run(minute(-5), 43_100.0, 6);
    tape.push(Candle {
        timestamp: minute(1),
        open: 43_000.0,
        high: 43_000.0,
        low: 40_900.0,
        close: 41_100.0,
        volume: 1.0,
    });
    tape.extend(MockCandleSource::flat_run(minute(2), 41_200.0, 10));

    let proposal = SignalProposal {
        position: Position::Long,
        price_open: 42_000.0,
        price_take_profit: 43_000.0,
        price_stop_loss: 41_000.0,
        minute_estimated_time: 60,
        note: None,
    };
    let engine = engine_with(tape, vec![Some(proposal)], 10).await;
    let mut events = engine.subscribe().await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    assert!(closes.is_empty());
    let kinds = lifecycle_kinds(&mut events);
    assert_eq!(kinds, vec!["scheduled", "cancelled"]);
}

/// Thirty quiet minutes: the position expires at a small loss.
#[tokio::test]
async fn time_expired_loss() {
    // Flat at the open so the first tick's VWAP matches the entry, then
    // a drift down that crosses nothing.
    let mut tape = MockCandleSource::flat_run(minute(-5), 50_000.0, 6);
    tape.extend(MockCandleSource::flat_run(minute(1), 49_500.0, 40));

    let proposal = SignalProposal {
        position: Position::Long,
        price_open: 50_000.0,
        price_take_profit: 51_000.0,
        price_stop_loss: 49_000.0,
        minute_estimated_time: 30,
        note: None,
    };
    let engine = engine_with(tape, vec![Some(proposal)], 40).await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    assert_eq!(closes.len(), 1);
    let (reason, _price_close, pnl_percent) = closes[0];
    assert_eq!(reason, CloseReason::TimeExpired);
    assert!(pnl_percent < 0.0);
}

/// Three sequential signals, each reaching take profit; never two pending
/// at once.
#[tokio::test]
async fn three_queued_take_profits_in_order() {
    let spike = |ts: i64| Candle {
        timestamp: ts,
        open: 100.0,
        high: 101.2,
        low: 100.0,
        close: 100.0,
        volume: 1.0,
    };

    let mut tape = MockCandleSource::flat_run(minute(-5), 100.0, 35);
    for slot in [3, 11, 19] {
        let idx = tape
            .iter()
            .position(|c| c.timestamp == minute(slot))
            .unwrap();
        tape[idx] = spike(minute(slot));
    }

    let proposal = SignalProposal {
        position: Position::Long,
        price_open: 100.0,
        price_take_profit: 101.0,
        price_stop_loss: 98.0,
        minute_estimated_time: 60,
        note: None,
    };
    // One proposal, four idle generations, repeated: the VWAP window is
    // clean of the previous spike by the time the next signal arrives.
    let mut queue = Vec::new();
    for _ in 0..3 {
        queue.push(Some(proposal.clone()));
        queue.extend(std::iter::repeat_with(|| None).take(4));
    }

    let engine = engine_with(tape, queue, 30).await;
    let mut events = engine.subscribe().await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    assert_eq!(closes.len(), 3);
    for (reason, price_close, _) in &closes {
        assert_eq!(*reason, CloseReason::TakeProfit);
        assert!((price_close - 101.0).abs() < 1e-9);
    }

    // Strict alternation: a signal opens only after the previous closed.
    let kinds = lifecycle_kinds(&mut events);
    assert_eq!(
        kinds,
        vec!["opened", "closed", "opened", "closed", "opened", "closed"]
    );
}

/// Scheduled short entry: waits for a rally into the limit, then rides
/// the fall to its take profit.
#[tokio::test]
async fn scheduled_short_reaches_take_profit() {
    let mut tape = MockCandleSource::flat_run(minute(-5), 50_000.0, 10);
    // The rally that fills the short limit, well under the stop.
    tape.push(Candle {
        timestamp: minute(5),
        open: 50_400.0,
        high: 51_100.0,
        low: 50_400.0,
        close: 50_900.0,
        volume: 1.0,
    });
    // The fall through the take profit.
    tape.push(Candle {
        timestamp: minute(6),
        open: 50_800.0,
        high: 50_800.0,
        low: 49_900.0,
        close: 50_000.0,
        volume: 1.0,
    });
    tape.extend(MockCandleSource::flat_run(minute(7), 49_950.0, 10));

    let proposal = SignalProposal {
        position: Position::Short,
        price_open: 51_000.0,
        price_take_profit: 50_000.0,
        price_stop_loss: 52_000.0,
        minute_estimated_time: 60,
        note: None,
    };
    let engine = engine_with(tape, vec![Some(proposal)], 15).await;
    let mut events = engine.subscribe().await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    assert_eq!(closes.len(), 1);
    let (reason, price_close, pnl_percent) = closes[0];
    assert_eq!(reason, CloseReason::TakeProfit);
    assert!((price_close - 50_000.0).abs() < 1e-9);
    assert!(pnl_percent > 1.0);

    let kinds = lifecycle_kinds(&mut events);
    assert_eq!(kinds, vec!["scheduled", "opened", "closed"]);
}

/// A cancelled schedule frees the lane for the next proposal.
#[tokio::test]
async fn cancelled_schedule_allows_regeneration() {
    let mut tape = MockCandleSource::flat_run(minute(-5), 43_100.0, 6);
    // Minute 1 knocks out the first schedule.
    tape.push(Candle {
        timestamp: minute(1),
        open: 43_000.0,
        high: 43_000.0,
        low: 40_900.0,
        close: 43_000.0,
        volume: 1.0,
    });
    tape.extend(MockCandleSource::flat_run(minute(2), 43_100.0, 20));

    let schedule = SignalProposal {
        position: Position::Long,
        price_open: 42_000.0,
        price_take_profit: 43_000.0,
        price_stop_loss: 41_000.0,
        minute_estimated_time: 60,
        note: None,
    };
    let immediate = SignalProposal {
        position: Position::Long,
        price_open: 43_100.0,
        price_take_profit: 43_700.0,
        price_stop_loss: 42_700.0,
        minute_estimated_time: 5,
        note: None,
    };

    let engine = engine_with(
        tape,
        vec![
            Some(schedule),
            None,
            None,
            None,
            None,
            None,
            Some(immediate),
        ],
        20,
    )
    .await;
    let mut events = engine.subscribe().await;

    let rx = engine
        .backtest_run("BTCUSDT", "scripted", "mock", "window")
        .await
        .unwrap();
    let closes = collect_closed(rx).await;

    // The second signal expires flat after five quiet minutes.
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].0, CloseReason::TimeExpired);

    let kinds = lifecycle_kinds(&mut events);
    assert_eq!(kinds, vec!["scheduled", "cancelled", "opened", "closed"]);
}
