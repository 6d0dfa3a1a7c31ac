//! Deterministic terminal simulator.
//!
//! Implements [`TerminalGateway`] over in-memory venue books: no network, no
//! randomness, tickets assigned from per-venue counters. Used by the engine's
//! scenario tests and by `cpd run` when the config selects `gateway.kind:
//! sim` (fixture-driven dry runs against a recorded book).
//!
//! Sessions authenticate unconditionally — credential handling belongs to
//! real venue adapters. Failure injection (`fail_connect`, `fail_fetch`,
//! `reject_ops`) exists so tests can exercise every branch of the engine's
//! failure taxonomy.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use cpd_gateway::{GatewayError, GatewayOp, OrderModification, OrderRequest, TerminalGateway};
use cpd_schemas::{Order, Position, SymbolInfo, TerminalCredentials, Ticket};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Mutation log
// ---------------------------------------------------------------------------

/// Every mutation a venue book has accepted, in order. Scenario tests assert
/// against this log ("exactly one modify", "no order placed this cycle").
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Place { ticket: Ticket, request: OrderRequest },
    ModifyOrder { ticket: Ticket, changes: OrderModification },
    CancelOrder { ticket: Ticket },
    ModifyPosition {
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
    ClosePosition { ticket: Ticket },
}

// ---------------------------------------------------------------------------
// Venue book
// ---------------------------------------------------------------------------

/// In-memory book for one simulated terminal.
#[derive(Clone, Debug, Default)]
pub struct VenueBook {
    pub orders: BTreeMap<Ticket, Order>,
    pub positions: BTreeMap<Ticket, Position>,
    pub symbols: BTreeMap<String, SymbolInfo>,
    next_ticket: u64,
    /// Next `connect` to this venue fails.
    pub fail_connect: bool,
    /// Fetches fail while set.
    pub fail_fetch: bool,
    /// Mutations of these ops are rejected while listed.
    pub reject_ops: Vec<GatewayOp>,
    pub mutations: Vec<Mutation>,
}

impl VenueBook {
    pub fn new() -> Self {
        Self {
            next_ticket: 1_000,
            ..Self::default()
        }
    }

    /// Register a tradable symbol with sensible forex-style bounds.
    pub fn with_symbol(mut self, name: &str, digits: u32) -> Self {
        self.symbols.insert(
            name.to_string(),
            SymbolInfo {
                name: name.to_string(),
                digits,
                volume_min: 0.01,
                volume_max: 100.0,
                volume_step: 0.01,
            },
        );
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.orders.insert(order.ticket, order);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.insert(position.ticket, position);
        self
    }

    fn allocate_ticket(&mut self) -> Ticket {
        let t = Ticket(self.next_ticket);
        self.next_ticket += 1;
        t
    }

    fn rejects(&self, op: GatewayOp) -> bool {
        self.reject_ops.contains(&op)
    }

    /// Mutations of one op kind, for targeted assertions.
    pub fn mutations_of(&self, op: GatewayOp) -> Vec<&Mutation> {
        self.mutations
            .iter()
            .filter(|m| {
                matches!(
                    (m, op),
                    (Mutation::Place { .. }, GatewayOp::PlaceOrder)
                        | (Mutation::ModifyOrder { .. }, GatewayOp::ModifyOrder)
                        | (Mutation::CancelOrder { .. }, GatewayOp::CancelOrder)
                        | (Mutation::ModifyPosition { .. }, GatewayOp::ModifyPosition)
                        | (Mutation::ClosePosition { .. }, GatewayOp::ClosePosition)
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// JSON shape accepted by [`SimTerminal::from_fixture_file`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimFixture {
    #[serde(default)]
    pub venues: BTreeMap<String, VenueFixture>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VenueFixture {
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
    #[serde(default = "default_next_ticket")]
    pub next_ticket: u64,
}

fn default_next_ticket() -> u64 {
    1_000
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// A gateway over a set of named venue books. `connect` selects the book by
/// the terminal's configured name.
#[derive(Debug, Default)]
pub struct SimTerminal {
    venues: BTreeMap<String, VenueBook>,
    session: Option<String>,
}

impl SimTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venue(mut self, name: &str, book: VenueBook) -> Self {
        self.venues.insert(name.to_string(), book);
        self
    }

    pub fn from_fixture(fixture: SimFixture) -> Self {
        let mut sim = Self::new();
        for (name, vf) in fixture.venues {
            let mut book = VenueBook {
                next_ticket: vf.next_ticket,
                ..VenueBook::default()
            };
            for s in vf.symbols {
                book.symbols.insert(s.name.clone(), s);
            }
            for o in vf.orders {
                book.orders.insert(o.ticket, o);
            }
            for p in vf.positions {
                book.positions.insert(p.ticket, p);
            }
            sim.venues.insert(name, book);
        }
        sim
    }

    pub fn from_fixture_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read sim fixture failed: {}", path.display()))?;
        let fixture: SimFixture = serde_json::from_str(&raw)
            .with_context(|| format!("parse sim fixture failed: {}", path.display()))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn venue(&self, name: &str) -> &VenueBook {
        &self.venues[name]
    }

    pub fn venue_mut(&mut self, name: &str) -> &mut VenueBook {
        self.venues.get_mut(name).expect("unknown sim venue")
    }

    fn session_book(&mut self) -> Result<&mut VenueBook, GatewayError> {
        let name = self.session.as_ref().ok_or(GatewayError::NotConnected)?;
        Ok(self
            .venues
            .get_mut(name)
            .expect("session names a registered venue"))
    }
}

impl TerminalGateway for SimTerminal {
    fn connect(
        &mut self,
        _credentials: &TerminalCredentials,
        label: &str,
    ) -> Result<(), GatewayError> {
        let Some(book) = self.venues.get_mut(label) else {
            return Err(GatewayError::Connect {
                terminal: label.to_string(),
                reason: "unknown terminal".to_string(),
            });
        };
        if book.fail_connect {
            book.fail_connect = false; // one-shot
            return Err(GatewayError::Connect {
                terminal: label.to_string(),
                reason: "simulated connect failure".to_string(),
            });
        }
        self.session = Some(label.to_string());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.session = None;
    }

    fn pending_orders(&mut self) -> Result<Vec<Order>, GatewayError> {
        let book = self.session_book()?;
        if book.fail_fetch {
            return Err(GatewayError::Fetch {
                what: "pending orders",
                reason: "simulated fetch failure".to_string(),
            });
        }
        Ok(book.orders.values().cloned().collect())
    }

    fn positions(&mut self) -> Result<Vec<Position>, GatewayError> {
        let book = self.session_book()?;
        if book.fail_fetch {
            return Err(GatewayError::Fetch {
                what: "positions",
                reason: "simulated fetch failure".to_string(),
            });
        }
        Ok(book.positions.values().cloned().collect())
    }

    fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, GatewayError> {
        let book = self.session_book()?;
        Ok(book.symbols.get(symbol).cloned())
    }

    fn place_order(&mut self, request: &OrderRequest) -> Result<Ticket, GatewayError> {
        let book = self.session_book()?;
        if book.rejects(GatewayOp::PlaceOrder) {
            return Err(GatewayError::Rejected {
                op: GatewayOp::PlaceOrder,
                ticket: None,
                reason: "simulated rejection".to_string(),
            });
        }
        if !book.symbols.contains_key(&request.symbol) {
            return Err(GatewayError::Rejected {
                op: GatewayOp::PlaceOrder,
                ticket: None,
                reason: format!("symbol {} not tradable", request.symbol),
            });
        }
        let ticket = book.allocate_ticket();
        book.orders.insert(
            ticket,
            Order {
                ticket,
                symbol: request.symbol.clone(),
                order_type: request.order_type,
                volume: request.volume,
                price_open: request.price,
                stop_loss: request.stop_loss,
                take_profit: request.take_profit,
                setup_time: Utc::now(),
                expiration: request.expiration,
                link: Some(request.link),
            },
        );
        book.mutations.push(Mutation::Place {
            ticket,
            request: request.clone(),
        });
        Ok(ticket)
    }

    fn modify_order(
        &mut self,
        ticket: Ticket,
        changes: &OrderModification,
    ) -> Result<(), GatewayError> {
        let book = self.session_book()?;
        if book.rejects(GatewayOp::ModifyOrder) {
            return Err(GatewayError::Rejected {
                op: GatewayOp::ModifyOrder,
                ticket: Some(ticket),
                reason: "simulated rejection".to_string(),
            });
        }
        let Some(order) = book.orders.get_mut(&ticket) else {
            return Err(GatewayError::Rejected {
                op: GatewayOp::ModifyOrder,
                ticket: Some(ticket),
                reason: "order not found".to_string(),
            });
        };
        order.volume = changes.volume;
        order.price_open = changes.price;
        order.stop_loss = changes.stop_loss;
        order.take_profit = changes.take_profit;
        order.expiration = changes.expiration;
        book.mutations.push(Mutation::ModifyOrder {
            ticket,
            changes: changes.clone(),
        });
        Ok(())
    }

    fn cancel_order(&mut self, ticket: Ticket) -> Result<(), GatewayError> {
        let book = self.session_book()?;
        if book.rejects(GatewayOp::CancelOrder) {
            return Err(GatewayError::Rejected {
                op: GatewayOp::CancelOrder,
                ticket: Some(ticket),
                reason: "simulated rejection".to_string(),
            });
        }
        if book.orders.remove(&ticket).is_none() {
            return Err(GatewayError::Rejected {
                op: GatewayOp::CancelOrder,
                ticket: Some(ticket),
                reason: "order not found".to_string(),
            });
        }
        book.mutations.push(Mutation::CancelOrder { ticket });
        Ok(())
    }

    fn modify_position(
        &mut self,
        ticket: Ticket,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), GatewayError> {
        let book = self.session_book()?;
        if book.rejects(GatewayOp::ModifyPosition) {
            return Err(GatewayError::Rejected {
                op: GatewayOp::ModifyPosition,
                ticket: Some(ticket),
                reason: "simulated rejection".to_string(),
            });
        }
        let Some(position) = book.positions.get_mut(&ticket) else {
            return Err(GatewayError::Rejected {
                op: GatewayOp::ModifyPosition,
                ticket: Some(ticket),
                reason: "position not found".to_string(),
            });
        };
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        book.mutations.push(Mutation::ModifyPosition {
            ticket,
            stop_loss,
            take_profit,
        });
        Ok(())
    }

    fn close_position(&mut self, ticket: Ticket) -> Result<(), GatewayError> {
        let book = self.session_book()?;
        if book.rejects(GatewayOp::ClosePosition) {
            return Err(GatewayError::Rejected {
                op: GatewayOp::ClosePosition,
                ticket: Some(ticket),
                reason: "simulated rejection".to_string(),
            });
        }
        if book.positions.remove(&ticket).is_none() {
            return Err(GatewayError::Rejected {
                op: GatewayOp::ClosePosition,
                ticket: Some(ticket),
                reason: "position not found".to_string(),
            });
        }
        book.mutations.push(Mutation::ClosePosition { ticket });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpd_schemas::{LinkId, OrderType};

    fn creds() -> TerminalCredentials {
        TerminalCredentials {
            server: "sim".to_string(),
            account: 1,
            password_env: "SIM_PASSWORD".to_string(),
            terminal_path: None,
        }
    }

    fn sim_with_symbol() -> SimTerminal {
        SimTerminal::new().with_venue("t1", VenueBook::new().with_symbol("EURUSD", 5))
    }

    #[test]
    fn operations_require_a_session() {
        let mut sim = sim_with_symbol();
        assert_eq!(sim.pending_orders().unwrap_err(), GatewayError::NotConnected);
    }

    #[test]
    fn tickets_are_sequential_and_link_round_trips() {
        let mut sim = sim_with_symbol();
        sim.connect(&creds(), "t1").unwrap();

        let req = OrderRequest {
            symbol: "EURUSD".to_string(),
            order_type: OrderType::BuyLimit,
            volume: 0.5,
            price: 1.1,
            stop_loss: None,
            take_profit: None,
            expiration: None,
            link: LinkId(100),
            comment: "copy of 100".to_string(),
        };
        let t1 = sim.place_order(&req).unwrap();
        let t2 = sim.place_order(&req).unwrap();
        assert_eq!(t1, Ticket(1_000));
        assert_eq!(t2, Ticket(1_001));

        let orders = sim.pending_orders().unwrap();
        assert!(orders.iter().all(|o| o.link == Some(LinkId(100))));
    }

    #[test]
    fn unknown_symbol_is_a_rejection() {
        let mut sim = sim_with_symbol();
        sim.connect(&creds(), "t1").unwrap();
        let req = OrderRequest {
            symbol: "XAUUSD".to_string(),
            order_type: OrderType::BuyLimit,
            volume: 0.5,
            price: 1900.0,
            stop_loss: None,
            take_profit: None,
            expiration: None,
            link: LinkId(1),
            comment: String::new(),
        };
        let err = sim.place_order(&req).unwrap_err();
        assert!(!err.is_connection());
    }

    #[test]
    fn connect_failure_is_one_shot() {
        let mut sim = sim_with_symbol();
        sim.venue_mut("t1").fail_connect = true;
        assert!(sim.connect(&creds(), "t1").is_err());
        assert!(sim.connect(&creds(), "t1").is_ok());
    }

    #[test]
    fn fixture_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        let raw = r#"{
            "venues": {
                "source": {
                    "symbols": [{"name":"EURUSD","digits":5,"volume_min":0.01,"volume_max":100.0,"volume_step":0.01}],
                    "orders": [{
                        "ticket": 100, "symbol": "EURUSD", "order_type": "BUY_LIMIT",
                        "volume": 1.0, "price_open": 1.1,
                        "setup_time": "2026-01-05T09:00:00Z"
                    }]
                },
                "t1": { "next_ticket": 5000 }
            }
        }"#;
        fs::write(&path, raw).unwrap();

        let mut sim = SimTerminal::from_fixture_file(&path).unwrap();
        sim.connect(&creds(), "source").unwrap();
        let orders = sim.pending_orders().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].ticket, Ticket(100));
        assert_eq!(orders[0].link, None);
    }
}
