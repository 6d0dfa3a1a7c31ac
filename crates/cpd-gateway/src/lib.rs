//! Terminal gateway — the single seam between the reconciliation engine and a
//! trading venue.
//!
//! # Contract
//!
//! - At most ONE session is active per gateway at any time. `connect` while
//!   connected replaces the session; `disconnect` is idempotent and must be
//!   called on every exit path from a terminal's processing, success or
//!   failure.
//! - All calls are synchronous and blocking. Timeouts and retries live behind
//!   the implementation; the engine never retries inline.
//! - `link` on an [`OrderRequest`] must survive the venue round-trip: an
//!   adapter stores it in whatever passthrough field its venue offers and
//!   restores it on the orders it returns from `pending_orders`.
//!
//! Real venue adapters implement [`TerminalGateway`] out-of-tree; the
//! deterministic in-repo implementation lives in `cpd-terminal-sim`.

use chrono::{DateTime, Utc};
use cpd_schemas::{
    LinkId, Order, OrderType, Position, SymbolInfo, TerminalCredentials, Ticket,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A new pending order to place on the connected terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub order_type: OrderType,
    pub volume: f64,
    pub price: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    /// Source ticket this copy mirrors; round-trips through the venue.
    pub link: LinkId,
    pub comment: String,
}

/// Field set for modifying an existing pending order.
///
/// Carried whole: venues reject partial modify requests, so the engine always
/// sends the complete recomputed field set even when only one field drifted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderModification {
    pub volume: f64,
    pub price: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Mutating operation names, for error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayOp {
    PlaceOrder,
    ModifyOrder,
    CancelOrder,
    ModifyPosition,
    ClosePosition,
}

impl std::fmt::Display for GatewayOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayOp::PlaceOrder => write!(f, "place_order"),
            GatewayOp::ModifyOrder => write!(f, "modify_order"),
            GatewayOp::CancelOrder => write!(f, "cancel_order"),
            GatewayOp::ModifyPosition => write!(f, "modify_position"),
            GatewayOp::ClosePosition => write!(f, "close_position"),
        }
    }
}

/// Failure taxonomy at the gateway seam.
///
/// `Connect` and `Fetch` are connection-class errors: fatal to the current
/// terminal (or cycle, for the source), retried only at the next scheduled
/// cycle. `Rejected` is a mutation failure: the venue refused an order
/// operation, which aborts the current terminal's remaining work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayError {
    Connect {
        terminal: String,
        reason: String,
    },
    /// An operation was issued without an active session.
    NotConnected,
    Fetch {
        what: &'static str,
        reason: String,
    },
    Rejected {
        op: GatewayOp,
        ticket: Option<Ticket>,
        reason: String,
    },
}

impl GatewayError {
    /// Connection-class errors (vs. venue rejections of a single mutation).
    pub fn is_connection(&self) -> bool {
        !matches!(self, GatewayError::Rejected { .. })
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Connect { terminal, reason } => {
                write!(f, "connect to {terminal} failed: {reason}")
            }
            GatewayError::NotConnected => write!(f, "no active terminal session"),
            GatewayError::Fetch { what, reason } => {
                write!(f, "fetch {what} failed: {reason}")
            }
            GatewayError::Rejected { op, ticket, reason } => match ticket {
                Some(t) => write!(f, "{op} rejected for ticket {t}: {reason}"),
                None => write!(f, "{op} rejected: {reason}"),
            },
        }
    }
}

impl std::error::Error for GatewayError {}

// ---------------------------------------------------------------------------
// The gateway trait
// ---------------------------------------------------------------------------

/// CRUD surface over one venue terminal.
pub trait TerminalGateway {
    /// Open a session. `label` is the terminal's configured name, used for
    /// logging and error context only.
    fn connect(&mut self, credentials: &TerminalCredentials, label: &str)
        -> Result<(), GatewayError>;

    /// Close the active session, if any. Idempotent.
    fn disconnect(&mut self);

    /// All pending (resting, unfilled) orders on the connected terminal.
    fn pending_orders(&mut self) -> Result<Vec<Order>, GatewayError>;

    /// All open positions on the connected terminal.
    fn positions(&mut self) -> Result<Vec<Position>, GatewayError>;

    /// Trading metadata for `symbol`; `None` when the symbol does not exist
    /// on this terminal (not an error).
    fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, GatewayError>;

    /// Place a new pending order; returns the venue-assigned ticket.
    fn place_order(&mut self, request: &OrderRequest) -> Result<Ticket, GatewayError>;

    /// Modify a resting order in place.
    fn modify_order(
        &mut self,
        ticket: Ticket,
        changes: &OrderModification,
    ) -> Result<(), GatewayError>;

    /// Cancel a resting order.
    fn cancel_order(&mut self, ticket: Ticket) -> Result<(), GatewayError>;

    /// Adjust the protective levels of an open position.
    fn modify_position(
        &mut self,
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), GatewayError>;

    /// Close an open position at market.
    fn close_position(&mut self, ticket: Ticket) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_class_covers_everything_but_rejections() {
        assert!(GatewayError::NotConnected.is_connection());
        assert!(GatewayError::Connect {
            terminal: "t1".into(),
            reason: "auth".into()
        }
        .is_connection());
        assert!(GatewayError::Fetch {
            what: "orders",
            reason: "timeout".into()
        }
        .is_connection());
        assert!(!GatewayError::Rejected {
            op: GatewayOp::PlaceOrder,
            ticket: None,
            reason: "off quotes".into()
        }
        .is_connection());
    }

    #[test]
    fn rejection_message_names_op_and_ticket() {
        let err = GatewayError::Rejected {
            op: GatewayOp::CancelOrder,
            ticket: Some(Ticket(42)),
            reason: "too late".into(),
        };
        assert_eq!(err.to_string(), "cancel_order rejected for ticket 42: too late");
    }
}
