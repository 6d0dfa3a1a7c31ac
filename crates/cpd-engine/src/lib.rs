//! The reconciliation engine.
//!
//! One [`Engine::run_cycle`] call is one reconciliation pass: fetch the
//! source book, then walk every configured target in configuration order —
//! copy missing orders, resync drifted copies, debounce and retire orphans,
//! and push protective-level changes onto mirrored positions. All venue
//! traffic goes through the [`cpd_gateway::TerminalGateway`] seam; all
//! cross-run memory lives in the [`cpd_state::StateStore`].
//!
//! # Failure semantics
//!
//! - Source fetch failure aborts the cycle; no target is touched.
//! - A target's connect/fetch/mutation failure aborts that target's remaining
//!   phases. Whether the *other* targets still run is the
//!   [`TargetFailurePolicy`](cpd_schemas::TargetFailurePolicy) decision.
//! - Every exit path disconnects the active session and still attempts the
//!   end-of-cycle state save.
//! - Skips (disallowed type, unmapped symbol, out-of-band lot, pending-order
//!   cap) are expected outcomes, logged and counted, never errors.

mod engine;
mod report;
mod settings;

pub use engine::Engine;
pub use report::CycleReport;
pub use settings::{EngineSettings, TargetSpec};
