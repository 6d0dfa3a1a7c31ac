//! Scenario: Failure semantics across source and targets.
//!
//! # Invariants under test
//!
//! 1. A source fetch failure aborts the whole cycle: no target is touched, no
//!    stale-source reconciliation happens, the state save still runs.
//! 2. Under the default isolate policy, one target's connect failure does not
//!    stop the remaining targets; the cycle still reports failure.
//! 3. Under fail-fast, the first target failure skips the rest of the cycle.
//! 4. A venue rejection mid-target aborts that target's remaining phases but
//!    keeps the mutations already acknowledged.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use cpd_engine::{Engine, EngineSettings, TargetSpec};
use cpd_gateway::GatewayOp;
use cpd_schemas::{
    LinkId, Order, OrderType, Position, PositionSide, TargetFailurePolicy, TerminalCredentials,
    TerminalPolicy, Ticket,
};
use cpd_state::StateStore;
use cpd_terminal_sim::{SimTerminal, VenueBook};

fn creds() -> TerminalCredentials {
    TerminalCredentials {
        server: "sim".to_string(),
        account: 1,
        password_env: "CPD_SIM_PASSWORD".to_string(),
        terminal_path: None,
    }
}

fn policy() -> TerminalPolicy {
    TerminalPolicy {
        lot_multiplier: 1.0,
        min_lot: 0.01,
        max_lot: 10.0,
        allowed_order_types: OrderType::ALL.into_iter().collect(),
        symbol_map: BTreeMap::new(),
        kill_orphan_orders: false,
        kill_orphan_positions: false,
        max_orphan_checks: 1,
        max_pending_orders: None,
    }
}

fn order(ticket: u64, link: Option<u64>) -> Order {
    Order {
        ticket: Ticket(ticket),
        symbol: "EURUSD".to_string(),
        order_type: OrderType::BuyLimit,
        volume: 1.0,
        price_open: 1.2,
        stop_loss: None,
        take_profit: None,
        setup_time: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
        expiration: None,
        link: link.map(LinkId),
    }
}

fn position(ticket: u64, sl: Option<f64>, link: Option<u64>) -> Position {
    Position {
        ticket: Ticket(ticket),
        symbol: "EURUSD".to_string(),
        side: PositionSide::Long,
        volume: 1.0,
        price_open: 1.2,
        stop_loss: sl,
        take_profit: None,
        open_time: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
        link: link.map(LinkId),
    }
}

fn two_target_settings(on_target_failure: TargetFailurePolicy) -> EngineSettings {
    EngineSettings {
        source_name: "source".to_string(),
        source_credentials: creds(),
        targets: vec![
            TargetSpec {
                name: "t1".to_string(),
                credentials: creds(),
                policy: policy(),
            },
            TargetSpec {
                name: "t2".to_string(),
                credentials: creds(),
                policy: policy(),
            },
        ],
        on_target_failure,
    }
}

fn two_target_sim() -> SimTerminal {
    SimTerminal::new()
        .with_venue(
            "source",
            VenueBook::new()
                .with_symbol("EURUSD", 5)
                .with_order(order(100, None)),
        )
        .with_venue("t1", VenueBook::new().with_symbol("EURUSD", 5))
        .with_venue("t2", VenueBook::new().with_symbol("EURUSD", 5))
}

// ---------------------------------------------------------------------------
// 1. Source failure aborts the cycle
// ---------------------------------------------------------------------------

#[test]
fn source_fetch_failure_aborts_before_any_target() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let mut sim = two_target_sim();
    sim.venue_mut("source").fail_fetch = true;

    let mut engine = Engine::new(
        sim,
        two_target_settings(TargetFailurePolicy::Isolate),
        StateStore::load(&state_path),
    );
    let report = engine.run_cycle();

    assert!(!report.success);
    assert_eq!(report.terminals_processed, 0);
    assert_eq!(report.mutations(), 0);
    assert!(engine.gateway_mut().venue("t1").orders.is_empty());
    assert!(engine.gateway_mut().venue("t2").orders.is_empty());
    // The best-effort save still ran.
    assert!(state_path.exists());
}

#[test]
fn source_connect_failure_aborts_the_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = two_target_sim();
    sim.venue_mut("source").fail_connect = true;

    let mut engine = Engine::new(
        sim,
        two_target_settings(TargetFailurePolicy::Isolate),
        StateStore::load(dir.path().join("state.json")),
    );
    let report = engine.run_cycle();
    assert!(!report.success);
    assert_eq!(report.terminals_processed, 0);
}

// ---------------------------------------------------------------------------
// 2. Isolation: remaining targets still run
// ---------------------------------------------------------------------------

#[test]
fn isolate_policy_processes_remaining_targets() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = two_target_sim();
    sim.venue_mut("t1").fail_connect = true;

    let mut engine = Engine::new(
        sim,
        two_target_settings(TargetFailurePolicy::Isolate),
        StateStore::load(dir.path().join("state.json")),
    );
    let report = engine.run_cycle();

    assert!(!report.success);
    assert_eq!(report.failed_terminals, vec!["t1".to_string()]);
    assert_eq!(report.terminals_processed, 1);
    // t2 got its copy despite t1's failure.
    assert_eq!(engine.gateway_mut().venue("t2").orders.len(), 1);
    assert!(engine.gateway_mut().venue("t1").orders.is_empty());
}

// ---------------------------------------------------------------------------
// 3. Fail-fast: the rest of the cycle is skipped
// ---------------------------------------------------------------------------

#[test]
fn fail_fast_policy_skips_remaining_targets() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = two_target_sim();
    sim.venue_mut("t1").fail_connect = true;

    let mut engine = Engine::new(
        sim,
        two_target_settings(TargetFailurePolicy::FailFast),
        StateStore::load(dir.path().join("state.json")),
    );
    let report = engine.run_cycle();

    assert!(!report.success);
    assert_eq!(report.failed_terminals, vec!["t1".to_string()]);
    assert_eq!(report.terminals_processed, 0);
    assert!(engine.gateway_mut().venue("t2").orders.is_empty());
}

// ---------------------------------------------------------------------------
// 4. Mutation rejection aborts the target, keeps prior work
// ---------------------------------------------------------------------------

#[test]
fn place_rejection_fails_target_but_keeps_acknowledged_mutations() {
    let dir = tempfile::tempdir().unwrap();
    // t1 rejects placements but will accept the position modify that never
    // runs (the copy phase aborts the target first). t2 is healthy.
    let mut sim = SimTerminal::new()
        .with_venue(
            "source",
            VenueBook::new()
                .with_symbol("EURUSD", 5)
                .with_order(order(100, None))
                .with_position(position(200, Some(1.0950), None)),
        )
        .with_venue(
            "t1",
            VenueBook::new()
                .with_symbol("EURUSD", 5)
                .with_position(position(901, Some(1.0900), Some(200))),
        )
        .with_venue("t2", VenueBook::new().with_symbol("EURUSD", 5));
    sim.venue_mut("t1").reject_ops = vec![GatewayOp::PlaceOrder];

    let mut engine = Engine::new(
        sim,
        two_target_settings(TargetFailurePolicy::Isolate),
        StateStore::load(dir.path().join("state.json")),
    );
    let report = engine.run_cycle();

    assert!(!report.success);
    assert_eq!(report.failed_terminals, vec!["t1".to_string()]);
    // t1's later phases were aborted: the drifted position stayed stale.
    assert_eq!(
        engine.gateway_mut().venue("t1").positions[&Ticket(901)].stop_loss,
        Some(1.0900)
    );
    // t2 still reconciled fully.
    assert_eq!(report.orders_copied, 1);
    assert_eq!(engine.gateway_mut().venue("t2").orders.len(), 1);
    // The failed target's fetch snapshots were still recorded.
    assert!(engine.store().state().target_positions["t1"].contains_key(&Ticket(901)));
}
