//! Risk transforms applied when mirroring source entities onto a target.
//!
//! # Invariants
//!
//! - Pure and deterministic: no IO, no clock, no randomness.
//! - `scale_lot` output always lies inside `[min_lot, max_lot]` before
//!   rounding; rounding to two decimals may push it below `min_lot`, which is
//!   why callers re-check with [`lot_in_band`].
//! - All float equality in the system goes through [`within_tolerance`] with
//!   [`PRICE_TOLERANCE`]; direct `==` on prices or volumes is a bug.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use cpd_schemas::OrderType;

/// Tolerance used for every price/volume/SL/TP equality check.
///
/// Absorbs float representation noise and broker-side rounding; values closer
/// than this are the same value as far as reconciliation is concerned.
pub const PRICE_TOLERANCE: f64 = 1e-5;

/// Lots are quoted in hundredths on every supported venue.
const LOT_DECIMALS: i32 = 2;

/// Scale a source lot volume by the target's multiplier, clamp into the
/// target's band, and round to lot precision.
///
/// A multiplier that is non-finite or ≤ 0 is a configuration error caught by
/// validation before a policy ever reaches this function.
pub fn scale_lot(source_volume: f64, multiplier: f64, min_lot: f64, max_lot: f64) -> f64 {
    let scaled = (source_volume * multiplier).clamp(min_lot, max_lot);
    let factor = 10f64.powi(LOT_DECIMALS);
    (scaled * factor).round() / factor
}

/// `true` when `volume` lies inside the closed band `[min_lot, max_lot]`.
pub fn lot_in_band(volume: f64, min_lot: f64, max_lot: f64) -> bool {
    min_lot <= volume && volume <= max_lot
}

/// Tolerance-based float equality.
pub fn within_tolerance(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() <= eps
}

/// Equality of two optional price levels (SL/TP), where absence compares
/// equal only to absence.
pub fn price_level_eq(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => within_tolerance(a, b, PRICE_TOLERANCE),
        _ => false,
    }
}

/// Map a source symbol to the target's name for it; identity when the map has
/// no entry.
pub fn map_symbol<'a>(source_symbol: &'a str, symbol_map: &'a BTreeMap<String, String>) -> &'a str {
    symbol_map
        .get(source_symbol)
        .map(String::as_str)
        .unwrap_or(source_symbol)
}

/// Exact set membership; an order whose type is not listed is skipped by the
/// engine, not failed.
pub fn order_type_allowed(order_type: OrderType, allowed: &BTreeSet<OrderType>) -> bool {
    allowed.contains(&order_type)
}

/// Round a price to the symbol's quote precision.
pub fn round_price(price: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (price * factor).round() / factor
}

/// Canonical comparison form for an order expiration.
///
/// Unifies every "no expiration" representation as `"GTC"` and renders
/// timestamps at whole-second precision, so source and target expirations
/// compare equal regardless of how each venue reports absence or sub-second
/// noise.
pub fn normalize_expiration(expiration: Option<DateTime<Utc>>) -> String {
    match expiration {
        None => "GTC".to_string(),
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}
