use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cpd_schemas::{Order, OrphanKind, Position, Ticket};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// An order as recorded at the start of the most recent completed cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    #[serde(flatten)]
    pub order: Order,
    pub last_seen: DateTime<Utc>,
}

/// A position as recorded at the start of the most recent completed cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    #[serde(flatten)]
    pub position: Position,
    pub last_seen: DateTime<Utc>,
}

/// Orphan-check counters for one terminal.
///
/// Orders and positions keep disjoint counter maps: ticket numbering is not
/// guaranteed disjoint between the two entity classes on any venue.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrphanCounters {
    #[serde(default)]
    pub orders: BTreeMap<Ticket, u32>,
    #[serde(default)]
    pub positions: BTreeMap<Ticket, u32>,
}

impl OrphanCounters {
    fn kind(&self, kind: OrphanKind) -> &BTreeMap<Ticket, u32> {
        match kind {
            OrphanKind::Order => &self.orders,
            OrphanKind::Position => &self.positions,
        }
    }

    fn kind_mut(&mut self, kind: OrphanKind) -> &mut BTreeMap<Ticket, u32> {
        match kind {
            OrphanKind::Order => &mut self.orders,
            OrphanKind::Position => &mut self.positions,
        }
    }

    fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.positions.is_empty()
    }
}

/// Version stamp written into every state document.
pub const STATE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// The persisted root document.
///
/// Every field defaults so that partial documents (older builds, hand-edited
/// recovery files) load without error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub source_orders: BTreeMap<Ticket, OrderSnapshot>,
    #[serde(default)]
    pub source_positions: BTreeMap<Ticket, PositionSnapshot>,
    #[serde(default)]
    pub target_orders: BTreeMap<String, BTreeMap<Ticket, OrderSnapshot>>,
    #[serde(default)]
    pub target_positions: BTreeMap<String, BTreeMap<Ticket, PositionSnapshot>>,
    #[serde(default)]
    pub orphan_counters: BTreeMap<String, OrphanCounters>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl Default for ReconciliationState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            source_orders: BTreeMap::new(),
            source_positions: BTreeMap::new(),
            target_orders: BTreeMap::new(),
            target_positions: BTreeMap::new(),
            orphan_counters: BTreeMap::new(),
            last_run: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owns the [`ReconciliationState`] and its backing file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: ReconciliationState,
}

impl StateStore {
    /// Load the state file at `path`, falling back to an empty state when the
    /// file is absent (first run) or unparsable (warned, then discarded — the
    /// next cycle re-derives snapshots from live fetches).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<ReconciliationState>(&raw) {
                Ok(state) => {
                    info!(path = %path.display(), "loaded reconciliation state");
                    state
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "state file unparsable, starting from empty state"
                    );
                    ReconciliationState::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no state file found, starting clean");
                ReconciliationState::default()
            }
        };
        Self { path, state }
    }

    /// Create a store with an explicit in-memory state (tests, import paths).
    pub fn with_state(path: impl Into<PathBuf>, state: ReconciliationState) -> Self {
        Self {
            path: path.into(),
            state,
        }
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    /// Persist the full state, stamping `last_run`. The parent directory is
    /// created if absent. Failure is reported to the caller, who treats it as
    /// non-fatal.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_run = Some(Utc::now());
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("create state dir failed: {}", dir.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.state)
            .context("serialize reconciliation state failed")?;
        fs::write(&self.path, format!("{json}\n"))
            .with_context(|| format!("write state failed: {}", self.path.display()))?;
        debug!(path = %self.path.display(), "saved reconciliation state");
        Ok(())
    }

    /// Operator escape hatch: write the current state to a different file.
    pub fn export(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.state).context("serialize state for export failed")?;
        fs::write(path, format!("{json}\n"))
            .with_context(|| format!("export state failed: {}", path.display()))?;
        info!(path = %path.display(), "exported reconciliation state");
        Ok(())
    }

    /// Operator escape hatch: replace the in-memory state with the document at
    /// `path`. Unlike `load`, a bad import file is an error — the operator
    /// asked for this specific document.
    pub fn import(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read import file failed: {}", path.display()))?;
        self.state = serde_json::from_str(&raw)
            .with_context(|| format!("parse import file failed: {}", path.display()))?;
        info!(path = %path.display(), "imported reconciliation state");
        Ok(())
    }

    // -- Snapshot recording (wholesale replace) ------------------------------

    pub fn record_source(&mut self, orders: &[Order], positions: &[Position]) {
        let now = Utc::now();
        self.state.source_orders = orders
            .iter()
            .map(|o| {
                (
                    o.ticket,
                    OrderSnapshot {
                        order: o.clone(),
                        last_seen: now,
                    },
                )
            })
            .collect();
        self.state.source_positions = positions
            .iter()
            .map(|p| {
                (
                    p.ticket,
                    PositionSnapshot {
                        position: p.clone(),
                        last_seen: now,
                    },
                )
            })
            .collect();
        debug!(
            orders = orders.len(),
            positions = positions.len(),
            "recorded source snapshots"
        );
    }

    pub fn record_target(&mut self, terminal: &str, orders: &[Order], positions: &[Position]) {
        let now = Utc::now();
        self.state.target_orders.insert(
            terminal.to_string(),
            orders
                .iter()
                .map(|o| {
                    (
                        o.ticket,
                        OrderSnapshot {
                            order: o.clone(),
                            last_seen: now,
                        },
                    )
                })
                .collect(),
        );
        self.state.target_positions.insert(
            terminal.to_string(),
            positions
                .iter()
                .map(|p| {
                    (
                        p.ticket,
                        PositionSnapshot {
                            position: p.clone(),
                            last_seen: now,
                        },
                    )
                })
                .collect(),
        );
        debug!(
            terminal,
            orders = orders.len(),
            positions = positions.len(),
            "recorded target snapshots"
        );
    }

    // -- Orphan detection (pure lookup, no counter mutation) -----------------

    /// Target orders whose link does not resolve to a live source order.
    ///
    /// An unlinked order is orphaned by definition: it has no originating
    /// source record. Whether orphans are acted on is the policy's decision,
    /// not detection's.
    pub fn detect_orphan_orders(&self, terminal: &str) -> Vec<OrderSnapshot> {
        let Some(orders) = self.state.target_orders.get(terminal) else {
            return Vec::new();
        };
        orders
            .values()
            .filter(|snap| {
                snap.order
                    .link
                    .map(|link| !self.state.source_orders.contains_key(&link.source_ticket()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Target positions whose link does not resolve to a live source position.
    pub fn detect_orphan_positions(&self, terminal: &str) -> Vec<PositionSnapshot> {
        let Some(positions) = self.state.target_positions.get(terminal) else {
            return Vec::new();
        };
        positions
            .values()
            .filter(|snap| {
                snap.position
                    .link
                    .map(|link| {
                        !self
                            .state
                            .source_positions
                            .contains_key(&link.source_ticket())
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    // -- Orphan counters (incremental semantics) -----------------------------

    /// Bump the consecutive-orphan counter and return the new count.
    pub fn orphan_increment(&mut self, terminal: &str, kind: OrphanKind, ticket: Ticket) -> u32 {
        let counters = self
            .state
            .orphan_counters
            .entry(terminal.to_string())
            .or_default();
        let count = counters.kind_mut(kind).entry(ticket).or_insert(0);
        *count += 1;
        debug!(terminal, %kind, %ticket, count = *count, "orphan check incremented");
        *count
    }

    /// Current count; zero when no counter exists.
    pub fn orphan_count(&self, terminal: &str, kind: OrphanKind, ticket: Ticket) -> u32 {
        self.state
            .orphan_counters
            .get(terminal)
            .and_then(|c| c.kind(kind).get(&ticket))
            .copied()
            .unwrap_or(0)
    }

    /// Remove the counter entirely — after the orphan was acted upon, or when
    /// its source link reappeared.
    pub fn orphan_reset(&mut self, terminal: &str, kind: OrphanKind, ticket: Ticket) {
        if let Some(counters) = self.state.orphan_counters.get_mut(terminal) {
            if counters.kind_mut(kind).remove(&ticket).is_some() {
                debug!(terminal, %kind, %ticket, "orphan check reset");
            }
            if counters.is_empty() {
                self.state.orphan_counters.remove(terminal);
            }
        }
    }

    /// Drop counters for tickets that no longer exist on the target at all.
    pub fn orphan_gc(&mut self, terminal: &str, kind: OrphanKind, active: &BTreeSet<Ticket>) {
        let Some(counters) = self.state.orphan_counters.get_mut(terminal) else {
            return;
        };
        let map = counters.kind_mut(kind);
        let before = map.len();
        map.retain(|ticket, _| active.contains(ticket));
        let removed = before - map.len();
        if removed > 0 {
            info!(terminal, %kind, removed, "garbage-collected orphan counters");
        }
        if counters.is_empty() {
            self.state.orphan_counters.remove(terminal);
        }
    }

    // -- Housekeeping --------------------------------------------------------

    /// Drop snapshots and counters for terminals that are no longer
    /// configured.
    pub fn prune_terminals(&mut self, active: &[String]) {
        let keep = |name: &String| active.iter().any(|a| a == name);
        self.state.target_orders.retain(|name, _| keep(name));
        self.state.target_positions.retain(|name, _| keep(name));
        self.state.orphan_counters.retain(|name, _| keep(name));
    }

    pub fn summary(&self) -> StateSummary {
        let mut terminals = BTreeMap::new();
        let mut names: BTreeSet<&String> = self.state.target_orders.keys().collect();
        names.extend(self.state.target_positions.keys());
        names.extend(self.state.orphan_counters.keys());
        for name in names {
            let counters = self.state.orphan_counters.get(name);
            terminals.insert(
                name.clone(),
                TerminalSummary {
                    orders: self
                        .state
                        .target_orders
                        .get(name)
                        .map(BTreeMap::len)
                        .unwrap_or(0),
                    positions: self
                        .state
                        .target_positions
                        .get(name)
                        .map(BTreeMap::len)
                        .unwrap_or(0),
                    orphan_checks: counters
                        .map(|c| c.orders.len() + c.positions.len())
                        .unwrap_or(0),
                },
            );
        }
        StateSummary {
            last_run: self.state.last_run,
            source_orders: self.state.source_orders.len(),
            source_positions: self.state.source_positions.len(),
            terminals,
        }
    }
}

/// Per-terminal roll-up for `state show`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TerminalSummary {
    pub orders: usize,
    pub positions: usize,
    pub orphan_checks: usize,
}

/// Whole-store roll-up for `state show`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub last_run: Option<DateTime<Utc>>,
    pub source_orders: usize,
    pub source_positions: usize,
    pub terminals: BTreeMap<String, TerminalSummary>,
}
