//! Where to put things down: the smart-storage scorer for returned shelves
//! and the sampler for parking retreats.
//!
//! Both sample rather than scan — the storage population is large and a
//! merely-good spot is fine. All draws come from the engine's seeded RNG,
//! so spot choice is replay-stable. The return score penalizes crowded
//! neighborhoods (AGVs within a 2-cell box) and near-enclosed pockets
//! (three-plus blocked neighbors) so shelves don't accrete into walls that
//! future paths must tunnel through.

use crate::FloorCtx;
use core_world::{Cell, Dir};
use rand::Rng;

const RETURN_SAMPLE: usize = 30;
const CROWD_RADIUS: u16 = 2;
const CROWD_WEIGHT: i64 = 20;
const ISLAND_PENALTY: i64 = 1000;
const JITTER: i64 = 10;
const PARKING_TRIES: usize = 50;

impl FloorCtx<'_> {
    /// Pick a drop cell for a carried shelf: best of up to 30 sampled free
    /// storage cells by `distance + 20·crowd + island + jitter`.
    pub(crate) fn pick_return_cell(&mut self, from: Cell, avoid: Option<Cell>) -> Option<Cell> {
        let spots = &self.floor.storage_cells;
        if spots.is_empty() {
            return None;
        }
        let sampled = rand::seq::index::sample(self.rng, spots.len(), spots.len().min(RETURN_SAMPLE));
        let mut best: Option<(i64, Cell)> = None;
        for i in sampled {
            let cell = spots[i];
            if self.floor.shelves.occupies(cell) || Some(cell) == avoid {
                continue;
            }
            if self.floor.agvs.iter().any(|a| a.pos == cell) {
                continue;
            }
            let dist = from.manhattan(cell) as i64;
            let crowd = self
                .floor
                .agvs
                .iter()
                .filter(|a| {
                    a.pos.row.abs_diff(cell.row) <= CROWD_RADIUS
                        && a.pos.col.abs_diff(cell.col) <= CROWD_RADIUS
                })
                .count() as i64;
            let mut blocked = 0;
            for d in Dir::CARDINAL {
                match cell.step(d) {
                    Some(c) if self.floor.grid.is_passable(c) && !self.floor.shelves.occupies(c) => {}
                    _ => blocked += 1,
                }
            }
            let island = if blocked >= 3 { ISLAND_PENALTY } else { 0 };
            let jitter = self.rng.random_range(0..JITTER);
            let score = dist + CROWD_WEIGHT * crowd + island + jitter;
            if best.is_none_or(|(bs, bc)| (score, cell) < (bs, bc)) {
                best = Some((score, cell));
            }
        }
        best.map(|(_, c)| c)
    }

    /// A free storage cell to idle on: sampled fast path, linear-scan
    /// fallback so a near-full floor still parks instead of blocking an
    /// aisle forever.
    pub(crate) fn pick_parking_cell(&mut self) -> Option<Cell> {
        let spots = &self.floor.storage_cells;
        if spots.is_empty() {
            return None;
        }
        let free = |floor: &crate::FloorState, cell: Cell| {
            !floor.shelves.occupies(cell) && !floor.agvs.iter().any(|a| a.pos == cell)
        };
        for _ in 0..PARKING_TRIES {
            let cell = spots[self.rng.random_range(0..spots.len())];
            if free(self.floor, cell) {
                return Some(cell);
            }
        }
        spots.iter().copied().find(|&c| free(self.floor, c))
    }
}
