//! Spatio-temporal reservation tables.
//!
//! One table per floor. Two time-indexed maps: cell ownership ("at second
//! `t`, cell `c` belongs to AGV `a`") and directed edge claims (the swap
//! guard — an AGV moving `p → q` over `[t, t+1]` claims `(p, q)` at `t`,
//! which forbids any opposing `q → p` move in the same slot). Both are only
//! mutated by the segment mover when it commits a path and by the traffic
//! controller when it parks a nudged blocker.
//!
//! Keys are `BTreeMap`s: iteration order is deterministic and range-drops
//! for retention cleanup are cheap. The table retains a bounded past —
//! entries older than `retention` seconds behind the *fleet minimum* clock
//! are dropped, so cleanup can never erase a second some AGV still has to
//! live through.

use core_world::{AgvId, Cell, Sec};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_RETENTION_SECS: Sec = 60;

#[derive(Debug, Default)]
pub struct ReservationTable {
    cells: BTreeMap<Sec, HashMap<Cell, AgvId>>,
    edges: BTreeMap<Sec, HashMap<(Cell, Cell), AgvId>>,
    retention: Sec,
}

impl ReservationTable {
    pub fn new(retention: Sec) -> Self {
        Self {
            cells: BTreeMap::new(),
            edges: BTreeMap::new(),
            retention,
        }
    }

    /// Claim `cell` at second `t` for `owner`. Returns false when another
    /// AGV already holds the slot (the claim is *not* overwritten).
    pub fn reserve_cell(&mut self, t: Sec, cell: Cell, owner: AgvId) -> bool {
        let slot = self.cells.entry(t).or_default();
        match slot.get(&cell) {
            Some(&holder) if holder != owner => false,
            _ => {
                slot.insert(cell, owner);
                true
            }
        }
    }

    /// Claim the directed edge `from → to` over `[t, t+1]` for `owner`.
    pub fn reserve_edge(&mut self, t: Sec, from: Cell, to: Cell, owner: AgvId) -> bool {
        let slot = self.edges.entry(t).or_default();
        match slot.get(&(from, to)) {
            Some(&holder) if holder != owner => false,
            _ => {
                slot.insert((from, to), owner);
                true
            }
        }
    }

    pub fn is_cell_reserved(&self, t: Sec, cell: Cell) -> bool {
        self.cells.get(&t).is_some_and(|s| s.contains_key(&cell))
    }

    /// True when the *opposing* traversal of this edge is already claimed,
    /// i.e. moving `from → to` at `t` would swap with the holder.
    pub fn is_swap_blocked(&self, t: Sec, from: Cell, to: Cell) -> bool {
        self.edges
            .get(&t)
            .is_some_and(|s| s.contains_key(&(to, from)))
    }

    pub fn cell_owner(&self, t: Sec, cell: Cell) -> Option<AgvId> {
        self.cells.get(&t).and_then(|s| s.get(&cell)).copied()
    }

    /// Park a stationary AGV: reserve `cell` for every second in
    /// `[from_t, from_t + duration]` (inclusive on both ends, so the slot
    /// the AGV departs in is still covered).
    pub fn lock_spot(&mut self, cell: Cell, from_t: Sec, duration: Sec, owner: AgvId) {
        for t in from_t..=from_t + duration {
            self.reserve_cell(t, cell, owner);
        }
    }

    /// Drop all slots older than `fleet_min - retention`. `fleet_min` must
    /// be the minimum `free_at` across the floor's AGVs: an AGV whose clock
    /// is at or past the cutoff keeps every second it can still observe.
    pub fn cleanup(&mut self, fleet_min: Sec) {
        let cutoff = fleet_min - self.retention;
        self.cells = self.cells.split_off(&cutoff);
        self.edges = self.edges.split_off(&cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A1: AgvId = AgvId(1);
    const A2: AgvId = AgvId(2);

    #[test]
    fn cell_claims_are_exclusive_per_second() {
        let mut rt = ReservationTable::new(DEFAULT_RETENTION_SECS);
        let c = Cell::new(3, 3);
        assert!(rt.reserve_cell(10, c, A1));
        assert!(rt.reserve_cell(10, c, A1)); // re-claim by owner is fine
        assert!(!rt.reserve_cell(10, c, A2));
        assert_eq!(rt.cell_owner(10, c), Some(A1));
        assert!(!rt.is_cell_reserved(11, c));
    }

    #[test]
    fn swap_guard_blocks_opposing_edge_only() {
        let mut rt = ReservationTable::new(DEFAULT_RETENTION_SECS);
        let p = Cell::new(0, 0);
        let q = Cell::new(0, 1);
        assert!(rt.reserve_edge(5, p, q, A1));
        assert!(rt.is_swap_blocked(5, q, p));
        assert!(!rt.is_swap_blocked(5, p, q));
        assert!(!rt.is_swap_blocked(6, q, p));
    }

    #[test]
    fn lock_spot_covers_inclusive_range() {
        let mut rt = ReservationTable::new(DEFAULT_RETENTION_SECS);
        let c = Cell::new(1, 1);
        rt.lock_spot(c, 100, 5, A1);
        for t in 100..=105 {
            assert!(rt.is_cell_reserved(t, c), "second {t} not covered");
        }
        assert!(!rt.is_cell_reserved(106, c));
    }

    #[test]
    fn cleanup_respects_fleet_minimum() {
        let mut rt = ReservationTable::new(60);
        let c = Cell::new(2, 2);
        rt.reserve_cell(0, c, A1);
        rt.reserve_cell(100, c, A1);
        rt.reserve_cell(200, c, A1);
        // Slowest AGV sits at t=160: the cutoff is 100, so the claim at
        // exactly 100 survives.
        rt.cleanup(160);
        assert!(!rt.is_cell_reserved(0, c));
        assert!(rt.is_cell_reserved(100, c));
        assert!(rt.is_cell_reserved(200, c));
    }
}
