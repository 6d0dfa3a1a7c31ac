//! Cross-run reconciliation state.
//!
//! One JSON document holds the order/position snapshots observed at the start
//! of the most recent completed cycle, plus the orphan-check counters that
//! debounce stale-copy removal. Snapshots are wholesale-replaced per entity
//! class on every fetch; counters are the only entities with incremental
//! semantics and the only ones that survive across cycles.
//!
//! # Durability contract
//!
//! - `load` never fails: a missing or unparsable file yields an empty state
//!   (with a warning for the unparsable case). Snapshots are re-derived from
//!   live fetches every cycle, so losing them costs one debounce window at
//!   worst.
//! - `save` is best-effort: the caller logs a failure and carries on.
//! - Missing top-level keys in the document deserialize to empty maps, so
//!   documents written by older builds load cleanly.

mod store;

pub use store::{
    OrphanCounters, OrderSnapshot, PositionSnapshot, ReconciliationState, StateStore,
    StateSummary, TerminalSummary, STATE_SCHEMA_VERSION,
};
