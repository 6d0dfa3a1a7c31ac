use std::collections::{BTreeMap, BTreeSet};

use cpd_gateway::{GatewayError, OrderModification, OrderRequest, TerminalGateway};
use cpd_schemas::{Order, OrphanKind, Position, TargetFailurePolicy, Ticket};
use cpd_state::StateStore;
use cpd_transform::{
    lot_in_band, map_symbol, normalize_expiration, order_type_allowed, price_level_eq,
    round_price, scale_lot, within_tolerance, PRICE_TOLERANCE,
};
use tracing::{debug, error, info, warn};

use crate::report::CycleReport;
use crate::settings::{EngineSettings, TargetSpec};

/// Drives one terminal session at a time through a full reconciliation pass.
///
/// Owns the gateway exclusively — there is never more than one active venue
/// session, and targets are processed strictly sequentially in configuration
/// order.
pub struct Engine<G> {
    gateway: G,
    settings: EngineSettings,
    store: StateStore,
}

impl<G: TerminalGateway> Engine<G> {
    pub fn new(gateway: G, settings: EngineSettings, store: StateStore) -> Self {
        Self {
            gateway,
            settings,
            store,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Direct gateway access, for scenario tests that mutate venue books
    /// between cycles.
    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// One full reconciliation pass across all targets.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let target_names: Vec<String> = self
            .settings
            .targets
            .iter()
            .map(|t| t.name.clone())
            .collect();
        self.store.prune_terminals(&target_names);

        let (source_orders, source_positions) = match self.fetch_source() {
            Ok(book) => book,
            Err(err) => {
                error!(%err, "source fetch failed, aborting cycle");
                self.save_best_effort();
                return report; // success stays false
            }
        };
        info!(
            orders = source_orders.len(),
            positions = source_positions.len(),
            "fetched source book"
        );
        self.store.record_source(&source_orders, &source_positions);

        let targets = self.settings.targets.clone();
        let fail_fast = self.settings.on_target_failure == TargetFailurePolicy::FailFast;
        for target in &targets {
            match self.process_target(target, &source_orders, &source_positions, &mut report) {
                Ok(()) => {
                    report.terminals_processed += 1;
                }
                Err(err) => {
                    error!(terminal = %target.name, %err, "target processing failed");
                    report.failed_terminals.push(target.name.clone());
                    if fail_fast {
                        warn!("fail-fast policy: remaining targets skipped this cycle");
                        break;
                    }
                }
            }
        }

        report.success = report.failed_terminals.is_empty();
        self.save_best_effort();

        info!(
            success = report.success,
            terminals = report.terminals_processed,
            copied = report.orders_copied,
            updated = report.orders_updated,
            cancelled = report.orders_cancelled,
            positions_updated = report.positions_updated,
            positions_closed = report.positions_closed,
            "cycle complete"
        );
        report
    }

    // -- Source --------------------------------------------------------------

    /// Single connect → fetch orders and positions → disconnect.
    fn fetch_source(&mut self) -> Result<(Vec<Order>, Vec<Position>), GatewayError> {
        self.gateway
            .connect(&self.settings.source_credentials, &self.settings.source_name)?;
        let result = self
            .gateway
            .pending_orders()
            .and_then(|orders| self.gateway.positions().map(|positions| (orders, positions)));
        self.gateway.disconnect();
        result
    }

    // -- Target --------------------------------------------------------------

    /// Connect, run all phases, and disconnect on every exit path.
    fn process_target(
        &mut self,
        target: &TargetSpec,
        source_orders: &[Order],
        source_positions: &[Position],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        self.gateway.connect(&target.credentials, &target.name)?;
        let result = self.reconcile_target(target, source_orders, source_positions, report);
        self.gateway.disconnect();
        result
    }

    fn reconcile_target(
        &mut self,
        target: &TargetSpec,
        source_orders: &[Order],
        source_positions: &[Position],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        let target_orders = self.gateway.pending_orders()?;
        let target_positions = self.gateway.positions()?;
        debug!(
            terminal = %target.name,
            orders = target_orders.len(),
            positions = target_positions.len(),
            "fetched target book"
        );
        self.store
            .record_target(&target.name, &target_orders, &target_positions);

        self.copy_new_orders(target, source_orders, &target_orders, report)?;
        self.update_linked_orders(target, source_orders, &target_orders, report)?;
        self.handle_orphan_orders(target, &target_orders, report)?;
        self.handle_orphan_positions(target, &target_positions, report)?;
        self.sync_positions(target, source_positions, &target_positions, report)?;
        Ok(())
    }

    // -- Copy phase ----------------------------------------------------------

    /// Place copies of source orders not yet mirrored on this target.
    fn copy_new_orders(
        &mut self,
        target: &TargetSpec,
        source_orders: &[Order],
        target_orders: &[Order],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        let existing_links: BTreeSet<Ticket> = target_orders
            .iter()
            .filter_map(|o| o.link.map(|l| l.source_ticket()))
            .collect();

        let candidates: Vec<&Order> = source_orders
            .iter()
            .filter(|o| !existing_links.contains(&o.ticket))
            .collect();
        if candidates.is_empty() {
            debug!(terminal = %target.name, "no new orders to copy");
            return Ok(());
        }

        // The cap pre-check runs against the unfiltered batch. Deferral is
        // not an error; the batch retries next cycle.
        if let Some(limit) = target.policy.pending_cap() {
            let would_hold = target_orders.len() + candidates.len();
            if would_hold > limit as usize {
                warn!(
                    terminal = %target.name,
                    current = target_orders.len(),
                    batch = candidates.len(),
                    limit,
                    "pending-order cap would be exceeded, deferring copy batch"
                );
                return Ok(());
            }
        }

        for source_order in candidates {
            self.copy_single_order(target, source_order, report)?;
        }
        Ok(())
    }

    fn copy_single_order(
        &mut self,
        target: &TargetSpec,
        source_order: &Order,
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        let policy = &target.policy;

        if !order_type_allowed(source_order.order_type, &policy.allowed_order_types) {
            debug!(
                terminal = %target.name,
                ticket = %source_order.ticket,
                order_type = %source_order.order_type,
                "order type not allowed, skipping"
            );
            return Ok(());
        }

        let symbol = map_symbol(&source_order.symbol, &policy.symbol_map).to_string();
        let Some(info) = self.gateway.symbol_info(&symbol)? else {
            warn!(
                terminal = %target.name,
                ticket = %source_order.ticket,
                symbol,
                "symbol not available on target, skipping"
            );
            return Ok(());
        };

        let volume = scale_lot(
            source_order.volume,
            policy.lot_multiplier,
            policy.min_lot,
            policy.max_lot,
        );
        if !lot_in_band(volume, policy.min_lot, policy.max_lot) {
            warn!(
                terminal = %target.name,
                ticket = %source_order.ticket,
                volume,
                "scaled lot outside policy band, skipping"
            );
            return Ok(());
        }

        let request = OrderRequest {
            symbol,
            order_type: source_order.order_type,
            volume,
            price: round_price(source_order.price_open, info.digits),
            stop_loss: source_order.stop_loss.map(|p| round_price(p, info.digits)),
            take_profit: source_order.take_profit.map(|p| round_price(p, info.digits)),
            expiration: source_order.expiration,
            link: source_order.ticket.into(),
            comment: format!("copied from {}", source_order.ticket),
        };
        let ticket = self.gateway.place_order(&request)?;
        info!(
            terminal = %target.name,
            source_ticket = %source_order.ticket,
            target_ticket = %ticket,
            volume,
            "copied order"
        );
        report.orders_copied += 1;
        Ok(())
    }

    // -- Update phase --------------------------------------------------------

    /// Resync every linked target order whose expected field set drifted from
    /// its source original. Expected volume is recomputed with the *current*
    /// policy, so live multiplier edits retroactively resync existing copies.
    fn update_linked_orders(
        &mut self,
        target: &TargetSpec,
        source_orders: &[Order],
        target_orders: &[Order],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        let source_by_ticket: BTreeMap<Ticket, &Order> =
            source_orders.iter().map(|o| (o.ticket, o)).collect();

        for target_order in target_orders {
            let Some(link) = target_order.link else {
                continue;
            };
            let Some(source_order) = source_by_ticket.get(&link.source_ticket()) else {
                continue; // orphan, handled by the orphan phase
            };

            let policy = &target.policy;
            let expected_volume = scale_lot(
                source_order.volume,
                policy.lot_multiplier,
                policy.min_lot,
                policy.max_lot,
            );

            let drifted = !within_tolerance(
                source_order.price_open,
                target_order.price_open,
                PRICE_TOLERANCE,
            ) || !within_tolerance(expected_volume, target_order.volume, PRICE_TOLERANCE)
                || !price_level_eq(source_order.stop_loss, target_order.stop_loss)
                || !price_level_eq(source_order.take_profit, target_order.take_profit)
                || normalize_expiration(source_order.expiration)
                    != normalize_expiration(target_order.expiration);
            if !drifted {
                continue;
            }

            let Some(info) = self.gateway.symbol_info(&target_order.symbol)? else {
                return Err(GatewayError::Fetch {
                    what: "symbol info",
                    reason: format!("{} unavailable on target", target_order.symbol),
                });
            };
            let changes = OrderModification {
                volume: expected_volume,
                price: round_price(source_order.price_open, info.digits),
                stop_loss: source_order.stop_loss.map(|p| round_price(p, info.digits)),
                take_profit: source_order
                    .take_profit
                    .map(|p| round_price(p, info.digits)),
                expiration: source_order.expiration,
            };
            self.gateway.modify_order(target_order.ticket, &changes)?;
            info!(
                terminal = %target.name,
                ticket = %target_order.ticket,
                source_ticket = %link,
                "updated drifted order"
            );
            report.orders_updated += 1;
        }
        Ok(())
    }

    // -- Orphan phases -------------------------------------------------------

    /// Debounced removal of orders whose source original disappeared.
    fn handle_orphan_orders(
        &mut self,
        target: &TargetSpec,
        target_orders: &[Order],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        if !target.policy.kill_orphan_orders {
            debug!(terminal = %target.name, "orphan-order handling disabled");
            return Ok(());
        }

        let orphans = self.store.detect_orphan_orders(&target.name);
        let orphan_tickets: BTreeSet<Ticket> =
            orphans.iter().map(|s| s.order.ticket).collect();
        if !orphans.is_empty() {
            info!(
                terminal = %target.name,
                count = orphans.len(),
                "detected orphaned orders"
            );
        }

        let max_checks = target.policy.max_orphan_checks;
        for snapshot in &orphans {
            let ticket = snapshot.order.ticket;
            let count = self
                .store
                .orphan_increment(&target.name, OrphanKind::Order, ticket);
            if count >= max_checks {
                self.gateway.cancel_order(ticket)?;
                self.store
                    .orphan_reset(&target.name, OrphanKind::Order, ticket);
                info!(terminal = %target.name, %ticket, "cancelled orphaned order");
                report.orders_cancelled += 1;
            } else {
                info!(
                    terminal = %target.name,
                    %ticket,
                    check = count,
                    max = max_checks,
                    "orphaned order below kill threshold, deferring"
                );
            }
        }

        // A live order that is no longer orphaned had its source link
        // reappear: its debounce restarts from zero.
        for order in target_orders {
            if !orphan_tickets.contains(&order.ticket) {
                self.store
                    .orphan_reset(&target.name, OrphanKind::Order, order.ticket);
            }
        }

        let active: BTreeSet<Ticket> = target_orders.iter().map(|o| o.ticket).collect();
        self.store
            .orphan_gc(&target.name, OrphanKind::Order, &active);
        Ok(())
    }

    /// Debounced closure of positions whose source original disappeared.
    /// Mirrors the order phase, but closes instead of cancels.
    fn handle_orphan_positions(
        &mut self,
        target: &TargetSpec,
        target_positions: &[Position],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        if !target.policy.kill_orphan_positions {
            debug!(terminal = %target.name, "orphan-position handling disabled");
            return Ok(());
        }

        let orphans = self.store.detect_orphan_positions(&target.name);
        let orphan_tickets: BTreeSet<Ticket> =
            orphans.iter().map(|s| s.position.ticket).collect();
        if !orphans.is_empty() {
            info!(
                terminal = %target.name,
                count = orphans.len(),
                "detected orphaned positions"
            );
        }

        let max_checks = target.policy.max_orphan_checks;
        for snapshot in &orphans {
            let ticket = snapshot.position.ticket;
            let count =
                self.store
                    .orphan_increment(&target.name, OrphanKind::Position, ticket);
            if count >= max_checks {
                self.gateway.close_position(ticket)?;
                self.store
                    .orphan_reset(&target.name, OrphanKind::Position, ticket);
                info!(terminal = %target.name, %ticket, "closed orphaned position");
                report.positions_closed += 1;
            } else {
                info!(
                    terminal = %target.name,
                    %ticket,
                    check = count,
                    max = max_checks,
                    "orphaned position below kill threshold, deferring"
                );
            }
        }

        for position in target_positions {
            if !orphan_tickets.contains(&position.ticket) {
                self.store
                    .orphan_reset(&target.name, OrphanKind::Position, position.ticket);
            }
        }

        let active: BTreeSet<Ticket> = target_positions.iter().map(|p| p.ticket).collect();
        self.store
            .orphan_gc(&target.name, OrphanKind::Position, &active);
        Ok(())
    }

    // -- Position sync -------------------------------------------------------

    /// Push source SL/TP changes onto linked target positions. Positions are
    /// never created or closed here.
    fn sync_positions(
        &mut self,
        target: &TargetSpec,
        source_positions: &[Position],
        target_positions: &[Position],
        report: &mut CycleReport,
    ) -> Result<(), GatewayError> {
        let source_by_ticket: BTreeMap<Ticket, &Position> =
            source_positions.iter().map(|p| (p.ticket, p)).collect();

        for target_position in target_positions {
            let Some(link) = target_position.link else {
                continue;
            };
            let Some(source_position) = source_by_ticket.get(&link.source_ticket()) else {
                continue;
            };

            let in_sync = price_level_eq(
                source_position.stop_loss,
                target_position.stop_loss,
            ) && price_level_eq(
                source_position.take_profit,
                target_position.take_profit,
            );
            if in_sync {
                continue;
            }

            self.gateway.modify_position(
                target_position.ticket,
                source_position.stop_loss,
                source_position.take_profit,
            )?;
            info!(
                terminal = %target.name,
                ticket = %target_position.ticket,
                source_ticket = %link,
                "synced position protective levels"
            );
            report.positions_updated += 1;
        }
        Ok(())
    }

    // -- Persistence ---------------------------------------------------------

    /// Save failure never fails the cycle: the next cycle re-derives fresher
    /// snapshots from live fetches.
    fn save_best_effort(&mut self) {
        if let Err(err) = self.store.save() {
            warn!(%err, "state save failed, continuing");
        }
    }
}
