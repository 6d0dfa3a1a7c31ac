use serde::Serialize;

/// Outcome and mutation counters of one reconciliation cycle.
///
/// Returned by value from every cycle invocation; the caller aggregates.
/// Counters reflect mutations actually acknowledged by venues — work done
/// before a mid-target failure stays counted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub success: bool,
    pub orders_copied: u32,
    pub orders_updated: u32,
    pub orders_cancelled: u32,
    pub positions_updated: u32,
    pub positions_closed: u32,
    pub terminals_processed: u32,
    /// Names of targets whose processing failed this cycle, in processing
    /// order. Empty on success.
    pub failed_terminals: Vec<String>,
}

impl CycleReport {
    /// Total venue mutations this cycle issued successfully.
    pub fn mutations(&self) -> u32 {
        self.orders_copied
            + self.orders_updated
            + self.orders_cancelled
            + self.positions_updated
            + self.positions_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_sums_all_counters() {
        let report = CycleReport {
            success: true,
            orders_copied: 1,
            orders_updated: 2,
            orders_cancelled: 3,
            positions_updated: 4,
            positions_closed: 5,
            terminals_processed: 2,
            failed_terminals: Vec::new(),
        };
        assert_eq!(report.mutations(), 15);
    }
}
