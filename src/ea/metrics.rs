#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeCause {
    UnhandledInput,
    Merge,
    Phi,
}

/// Counters for one analysis run. Purely informational; nothing branches
/// on them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    pub materializations: u64,
    pub materializations_unhandled: u64,
    pub materializations_merge: u64,
    pub materializations_phi: u64,
    pub allocations_virtualized: u64,
    pub loads_eliminated: u64,
    pub loads_not_eliminated: u64,
    pub stores_recorded: u64,
}

impl Metrics {
    /// The total materialization count is kept where the allocations are
    /// emitted; this only attributes the triggering site.
    pub fn count_materialization_cause(&mut self, cause: MaterializeCause) {
        match cause {
            MaterializeCause::UnhandledInput => self.materializations_unhandled += 1,
            MaterializeCause::Merge => self.materializations_merge += 1,
            MaterializeCause::Phi => self.materializations_phi += 1,
        }
    }

    pub fn absorb(&mut self, other: &Metrics) {
        self.materializations += other.materializations;
        self.materializations_unhandled += other.materializations_unhandled;
        self.materializations_merge += other.materializations_merge;
        self.materializations_phi += other.materializations_phi;
        self.allocations_virtualized += other.allocations_virtualized;
        self.loads_eliminated += other.loads_eliminated;
        self.loads_not_eliminated += other.loads_not_eliminated;
        self.stores_recorded += other.stores_recorded;
    }

    pub fn log_debug(&self) {
        log::debug!(
            "virtualized {} allocations, materialized {} (unhandled {}, merge {}, phi {})",
            self.allocations_virtualized,
            self.materializations,
            self.materializations_unhandled,
            self.materializations_merge,
            self.materializations_phi,
        );
        log::debug!(
            "eliminated {} of {} loads, recorded {} stores",
            self.loads_eliminated,
            self.loads_eliminated + self.loads_not_eliminated,
            self.stores_recorded,
        );
    }
}
