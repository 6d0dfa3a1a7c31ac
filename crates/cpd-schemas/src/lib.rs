//! Shared data model for the CopyDesk terminal-mirroring system.
//!
//! Plain serde structs only — no IO, no venue calls. Everything that crosses
//! a crate boundary (gateway, state store, engine, config) is defined here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Venue-native identifier of an order or position.
///
/// Tickets are only unique within one terminal and one entity kind; never
/// compare tickets across terminals.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-venue association: the source ticket a target-side copy was made
/// from.
///
/// This is an explicit typed field, not a venue concept. Gateway adapters
/// translate it to and from whatever passthrough field their venue exposes;
/// the engine and state store only ever see the typed form.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl LinkId {
    /// The source ticket this link points at.
    pub fn source_ticket(&self) -> Ticket {
        Ticket(self.0)
    }
}

impl From<Ticket> for LinkId {
    fn from(t: Ticket) -> Self {
        LinkId(t.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Pending (conditional) order types that can be mirrored.
///
/// Market orders are out of scope: the copier mirrors resting orders only.
/// Wire names match the config vocabulary (`BUY_LIMIT`, ...).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum OrderType {
    #[serde(rename = "BUY_LIMIT")]
    BuyLimit,
    #[serde(rename = "SELL_LIMIT")]
    SellLimit,
    #[serde(rename = "BUY_STOP")]
    BuyStop,
    #[serde(rename = "SELL_STOP")]
    SellStop,
    #[serde(rename = "BUY_STOP_LIMIT")]
    BuyStopLimit,
    #[serde(rename = "SELL_STOP_LIMIT")]
    SellStopLimit,
}

impl OrderType {
    pub const ALL: [OrderType; 6] = [
        OrderType::BuyLimit,
        OrderType::SellLimit,
        OrderType::BuyStop,
        OrderType::SellStop,
        OrderType::BuyStopLimit,
        OrderType::SellStopLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::BuyLimit => "BUY_LIMIT",
            OrderType::SellLimit => "SELL_LIMIT",
            OrderType::BuyStop => "BUY_STOP",
            OrderType::SellStop => "SELL_STOP",
            OrderType::BuyStopLimit => "BUY_STOP_LIMIT",
            OrderType::SellStopLimit => "SELL_STOP_LIMIT",
        }
    }

    /// Parse the config/wire name. Returns `None` for unknown names so the
    /// validator can report them instead of panicking.
    pub fn parse(name: &str) -> Option<OrderType> {
        OrderType::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending order as observed on a terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub ticket: Ticket,
    pub symbol: String,
    pub order_type: OrderType,
    /// Lot volume. Venues quote lots in hundredths, so two decimals carry
    /// full precision.
    pub volume: f64,
    pub price_open: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    pub setup_time: DateTime<Utc>,
    /// `None` means good-till-cancelled.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    /// Present on target-side copies; `None` on source orders and on orders
    /// placed outside the copier.
    #[serde(default)]
    pub link: Option<LinkId>,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PositionSide {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => f.write_str("LONG"),
            PositionSide::Short => f.write_str("SHORT"),
        }
    }
}

/// An open, filled position as observed on a terminal.
///
/// The copier never opens positions itself — they arise when mirrored orders
/// fill on the venue. It only adjusts stop-loss/take-profit or closes
/// orphans.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: PositionSide,
    pub volume: f64,
    pub price_open: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    pub open_time: DateTime<Utc>,
    #[serde(default)]
    pub link: Option<LinkId>,
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Per-symbol trading metadata as reported by a terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Quote precision; prices sent to this symbol are rounded to this many
    /// decimal places.
    pub digits: u32,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

// ---------------------------------------------------------------------------
// Per-target policy
// ---------------------------------------------------------------------------

/// Optional cap on the number of pending orders a target may hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOrderCap {
    pub enabled: bool,
    pub limit: u32,
}

/// Risk-transform policy for one target terminal. Immutable for the duration
/// of a reconciliation cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerminalPolicy {
    pub lot_multiplier: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    /// Order types this target accepts copies of. An order whose type is not
    /// listed is skipped, not an error.
    pub allowed_order_types: BTreeSet<OrderType>,
    /// Source symbol -> target symbol. Unmapped symbols pass through
    /// unchanged.
    #[serde(default)]
    pub symbol_map: BTreeMap<String, String>,
    #[serde(default)]
    pub kill_orphan_orders: bool,
    #[serde(default)]
    pub kill_orphan_positions: bool,
    /// Consecutive cycles an entity must be seen orphaned before it is
    /// cancelled/closed.
    pub max_orphan_checks: u32,
    #[serde(default)]
    pub max_pending_orders: Option<PendingOrderCap>,
}

impl TerminalPolicy {
    /// Effective pending-order cap, `None` when disabled or absent.
    pub fn pending_cap(&self) -> Option<u32> {
        match &self.max_pending_orders {
            Some(cap) if cap.enabled => Some(cap.limit),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orphan bookkeeping
// ---------------------------------------------------------------------------

/// Which entity class an orphan counter belongs to.
///
/// Counters are keyed `(terminal, kind, ticket)`: venues do not guarantee
/// order and position ticket ranges are disjoint, so the two classes must
/// never share a counter namespace.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum OrphanKind {
    #[serde(rename = "orders")]
    Order,
    #[serde(rename = "positions")]
    Position,
}

impl fmt::Display for OrphanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanKind::Order => f.write_str("order"),
            OrphanKind::Position => f.write_str("position"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle-wide policy
// ---------------------------------------------------------------------------

/// What a cycle does with the remaining targets after one target fails.
///
/// `Isolate` is the default: a failed target is recorded and the rest still
/// reconcile. `FailFast` aborts the remaining targets, for operators who
/// prefer stopping early over a partially-applied cycle.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TargetFailurePolicy {
    #[default]
    Isolate,
    FailFast,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Login material for one terminal session.
///
/// The password is an environment-variable *name*, never a literal; the
/// gateway resolves it at connect time. Config validation rejects literal
/// `password:` keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerminalCredentials {
    pub server: String,
    pub account: u64,
    pub password_env: String,
    /// Path to the terminal executable, for venues that need one.
    #[serde(default)]
    pub terminal_path: Option<String>,
}
