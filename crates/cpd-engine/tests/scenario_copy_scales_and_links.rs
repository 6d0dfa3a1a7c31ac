//! Scenario: Copy phase scales volume and links back to the source.
//!
//! # Invariants under test
//!
//! 1. A source order with no mirror on the target is copied exactly once,
//!    with `volume = scale_lot(source, policy)` and `link = source.ticket`.
//! 2. Prices and protective levels are rounded to the target symbol's digits.
//! 3. A second cycle does not duplicate an already-mirrored order.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use cpd_engine::{Engine, EngineSettings, TargetSpec};
use cpd_schemas::{
    LinkId, Order, OrderType, TargetFailurePolicy, TerminalCredentials, TerminalPolicy, Ticket,
};
use cpd_state::StateStore;
use cpd_terminal_sim::{SimTerminal, VenueBook};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn creds() -> TerminalCredentials {
    TerminalCredentials {
        server: "sim".to_string(),
        account: 1,
        password_env: "CPD_SIM_PASSWORD".to_string(),
        terminal_path: None,
    }
}

fn policy(multiplier: f64) -> TerminalPolicy {
    TerminalPolicy {
        lot_multiplier: multiplier,
        min_lot: 0.01,
        max_lot: 10.0,
        allowed_order_types: OrderType::ALL.into_iter().collect(),
        symbol_map: BTreeMap::new(),
        kill_orphan_orders: true,
        kill_orphan_positions: true,
        max_orphan_checks: 3,
        max_pending_orders: None,
    }
}

fn source_order(ticket: u64) -> Order {
    Order {
        ticket: Ticket(ticket),
        symbol: "EURUSD".to_string(),
        order_type: OrderType::BuyLimit,
        volume: 1.0,
        price_open: 1.1,
        stop_loss: Some(1.090_004),
        take_profit: Some(1.123_456_78),
        setup_time: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
        expiration: None,
        link: None,
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        source_name: "source".to_string(),
        source_credentials: creds(),
        targets: vec![TargetSpec {
            name: "t1".to_string(),
            credentials: creds(),
            policy: policy(0.5),
        }],
        on_target_failure: TargetFailurePolicy::Isolate,
    }
}

fn engine(sim: SimTerminal, dir: &tempfile::TempDir) -> Engine<SimTerminal> {
    Engine::new(
        sim,
        settings(),
        StateStore::load(dir.path().join("state.json")),
    )
}

// ---------------------------------------------------------------------------
// 1 + 2. One copy, scaled and rounded
// ---------------------------------------------------------------------------

#[test]
fn source_order_is_copied_with_scaled_volume_and_link() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimTerminal::new()
        .with_venue(
            "source",
            VenueBook::new()
                .with_symbol("EURUSD", 5)
                .with_order(source_order(100)),
        )
        .with_venue("t1", VenueBook::new().with_symbol("EURUSD", 5));
    let mut engine = engine(sim, &dir);

    let report = engine.run_cycle();
    assert!(report.success);
    assert_eq!(report.orders_copied, 1);

    let book = engine.gateway_mut().venue("t1");
    assert_eq!(book.orders.len(), 1);
    let copy = book.orders.values().next().unwrap();
    assert!((copy.volume - 0.5).abs() < 1e-9);
    assert_eq!(copy.link, Some(LinkId(100)));
    assert_eq!(copy.order_type, OrderType::BuyLimit);
    assert!((copy.price_open - 1.1).abs() < 1e-9);
    // Five-digit rounding of the protective levels.
    assert!((copy.stop_loss.unwrap() - 1.09).abs() < 1e-9);
    assert!((copy.take_profit.unwrap() - 1.12346).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// 3. Idempotence across cycles
// ---------------------------------------------------------------------------

#[test]
fn second_cycle_does_not_duplicate_the_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimTerminal::new()
        .with_venue(
            "source",
            VenueBook::new()
                .with_symbol("EURUSD", 5)
                .with_order(source_order(100)),
        )
        .with_venue("t1", VenueBook::new().with_symbol("EURUSD", 5));
    let mut engine = engine(sim, &dir);

    let first = engine.run_cycle();
    assert_eq!(first.orders_copied, 1);

    let second = engine.run_cycle();
    assert!(second.success);
    assert_eq!(second.orders_copied, 0);
    assert_eq!(second.orders_updated, 0);
    assert_eq!(engine.gateway_mut().venue("t1").orders.len(), 1);
}
