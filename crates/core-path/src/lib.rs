//! Time-expanded cooperative A*.
//!
//! Single-agent search over `(cell, time, incoming-direction)` against the
//! shared reservation table. Direction is part of the state on purpose:
//! without it the turn penalty collapses to zero, free-space paths decay
//! into arbitrary zigzags, and the outer retry ladder loses its ability to
//! tell "making progress" from "thrashing".
//!
//! Dynamic constraints (cell and swap-edge reservations) are only honored
//! inside a bounded lookahead window from the search's start second. The
//! table can hold thousands of entries per second; honoring far-future
//! claims is pointless (the AGV re-plans long before reaching them) and
//! makes the frontier fan out without bound. The window decouples per-call
//! cost from simulation length and is a config knob upstream.
//!
//! All step costs are small integers, so `f = g + w·h` ordering needs no
//! floats; the frontier key `(f, h, t, cell, dir)` is a total order, which
//! makes expansion — and therefore every produced path — deterministic.

use core_reserve::ReservationTable;
use core_world::{Cell, Dir, Grid, Sec};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Tunable cost model. Defaults mirror the production parameter set.
#[derive(Debug, Clone)]
pub struct PathCosts {
    /// Inflation applied to the Manhattan heuristic (weighted A*).
    pub heuristic_weight: u32,
    pub turn: u32,
    pub u_turn: u32,
    pub wait: u32,
    /// Surcharge per shelf cell traversed with `allow_tunneling`.
    pub tunnel: u32,
    /// Soft surcharge for an empty AGV slipping under a stored shelf.
    pub shelf_pass: u32,
    /// Expansion budget: `max(floor, per_cell × manhattan(start, goal))`.
    pub expansion_floor: u32,
    pub expansion_per_cell: u32,
    /// Seconds of dynamic lookahead honored from the search start.
    pub dynamic_horizon: Sec,
}

impl Default for PathCosts {
    fn default() -> Self {
        Self {
            heuristic_weight: 2,
            turn: 2,
            u_turn: 4,
            wait: 1,
            tunnel: 50,
            shelf_pass: 3,
            expansion_floor: 500,
            expansion_per_cell: 15,
            dynamic_horizon: 60,
        }
    }
}

/// One pathfinding request.
#[derive(Debug, Clone, Copy)]
pub struct PathQuery {
    pub start: Cell,
    pub goal: Cell,
    pub start_time: Sec,
    pub start_dir: Dir,
    /// Carrying a shelf: stored shelves are hard obstacles (unless the
    /// query tunnels) except at the two endpoints.
    pub is_loaded: bool,
    /// Drop all reservation-table constraints (last-resort replans and
    /// shuffle sub-moves).
    pub ignore_dynamic: bool,
    /// Let a loaded AGV cross shelf cells at `tunnel` cost instead of
    /// rejecting them.
    pub allow_tunneling: bool,
}

impl PathQuery {
    pub fn new(start: Cell, goal: Cell, start_time: Sec, start_dir: Dir) -> Self {
        Self {
            start,
            goal,
            start_time,
            start_dir,
            is_loaded: false,
            ignore_dynamic: false,
            allow_tunneling: false,
        }
    }

    pub fn loaded(mut self, yes: bool) -> Self {
        self.is_loaded = yes;
        self
    }

    pub fn ignore_dynamic(mut self, yes: bool) -> Self {
        self.ignore_dynamic = yes;
        self
    }

    pub fn allow_tunneling(mut self, yes: bool) -> Self {
        self.allow_tunneling = yes;
        self
    }
}

/// A committed-ready plan: `steps` starts at `(start, start_time)` and each
/// subsequent entry is one second later. `reached_goal` is false only for
/// best-effort partial results under `ignore_dynamic`.
#[derive(Debug, Clone)]
pub struct PlannedPath {
    pub steps: Vec<(Cell, Sec)>,
    pub end_time: Sec,
    pub end_dir: Dir,
    pub reached_goal: bool,
}

impl PlannedPath {
    pub fn end_cell(&self) -> Cell {
        // `steps` always holds at least the start entry by construction.
        self.steps[self.steps.len() - 1].0
    }
}

type StateKey = (Cell, Sec, Dir);

/// Borrowed view of everything the search reads. The pathfinder never
/// mutates the world; committing a path is the segment mover's job.
///
/// `blockers` holds cells under stationary AGVs (vehicles whose clocks lag
/// the querying AGV's). Moving vehicles are covered by reservations; the
/// standing ones are not, so they are hard obstacles here — that failure is
/// what hands the segment mover a blocker to nudge.
pub struct Pathfinder<'a> {
    grid: &'a Grid,
    reservations: &'a ReservationTable,
    occupancy: &'a HashSet<Cell>,
    blockers: &'a HashSet<Cell>,
    costs: &'a PathCosts,
}

impl<'a> Pathfinder<'a> {
    pub fn new(
        grid: &'a Grid,
        reservations: &'a ReservationTable,
        occupancy: &'a HashSet<Cell>,
        blockers: &'a HashSet<Cell>,
        costs: &'a PathCosts,
    ) -> Self {
        Self {
            grid,
            reservations,
            occupancy,
            blockers,
            costs,
        }
    }

    pub fn find(&self, q: &PathQuery) -> Option<PlannedPath> {
        if !self.grid.is_passable(q.start) || !self.grid.is_passable(q.goal) {
            return None;
        }
        if !q.ignore_dynamic && self.blockers.contains(&q.goal) {
            // A vehicle is parked on the goal; no constrained path exists.
            return None;
        }
        if q.start == q.goal {
            return Some(PlannedPath {
                steps: vec![(q.start, q.start_time)],
                end_time: q.start_time,
                end_dir: q.start_dir,
                reached_goal: true,
            });
        }

        let budget = self
            .costs
            .expansion_floor
            .max(self.costs.expansion_per_cell * q.start.manhattan(q.goal));

        // Min-heap on (f, h, t, cell, dir); h as secondary key biases
        // expansion toward the goal among equal-f nodes.
        let mut open: BinaryHeap<Reverse<(u32, u32, Sec, Cell, Dir)>> = BinaryHeap::new();
        let mut g_score: HashMap<StateKey, u32> = HashMap::new();
        let mut came_from: HashMap<StateKey, StateKey> = HashMap::new();

        let h0 = self.h(q.start, q.goal);
        let start_key = (q.start, q.start_time, q.start_dir);
        g_score.insert(start_key, 0);
        open.push(Reverse((
            self.costs.heuristic_weight * h0,
            h0,
            q.start_time,
            q.start,
            q.start_dir,
        )));

        // Best node seen so far (min h, then min f) for the partial-path
        // fallback when the budget runs out under ignore_dynamic.
        let mut best: (u32, u32, StateKey) = (h0, self.costs.heuristic_weight * h0, start_key);

        let mut expanded: u32 = 0;
        while let Some(Reverse((f, h, t, cell, dir))) = open.pop() {
            expanded += 1;
            if expanded > budget {
                break;
            }
            let key = (cell, t, dir);
            let g = match g_score.get(&key) {
                // Stale heap entry: a cheaper route to this state was found
                // after this node was pushed.
                Some(&g) if g + self.costs.heuristic_weight * h == f => g,
                _ => continue,
            };
            if cell == q.goal {
                return Some(self.reconstruct(&came_from, key, true));
            }
            if (h, f) < (best.0, best.1) {
                best = (h, f, key);
            }

            for next_dir in Dir::ALL {
                let (next_cell, eff_dir) = if next_dir == Dir::Wait {
                    // Waiting holds position and keeps the heading.
                    (cell, dir)
                } else {
                    match cell.step(next_dir) {
                        Some(c) if self.grid.is_passable(c) => (c, next_dir),
                        _ => continue,
                    }
                };
                let next_time = t + 1;

                // Workstation cells are only traversable as endpoints;
                // mid-path they behave like walls.
                if self.grid.is_station(next_cell) && next_cell != q.goal && next_cell != q.start {
                    continue;
                }

                if !q.ignore_dynamic {
                    if self.blockers.contains(&next_cell) && next_cell != q.start {
                        continue;
                    }
                    if (next_time - q.start_time) < self.costs.dynamic_horizon {
                        if self.reservations.is_cell_reserved(next_time, next_cell) {
                            continue;
                        }
                        if next_dir != Dir::Wait
                            && self.reservations.is_swap_blocked(t, cell, next_cell)
                        {
                            continue;
                        }
                    }
                }

                let mut step_cost = 1u32;
                let on_shelf = self.occupancy.contains(&next_cell);
                if on_shelf && next_cell != q.goal && next_cell != q.start {
                    if q.is_loaded {
                        if q.allow_tunneling {
                            step_cost += self.costs.tunnel;
                        } else {
                            continue;
                        }
                    } else {
                        step_cost += self.costs.shelf_pass;
                    }
                }

                if next_dir == Dir::Wait {
                    step_cost += self.costs.wait;
                } else if dir != Dir::Wait && next_dir != dir {
                    step_cost += if next_dir.is_reversal_of(dir) {
                        self.costs.u_turn
                    } else {
                        self.costs.turn
                    };
                }

                let next_g = g + step_cost;
                let next_key = (next_cell, next_time, eff_dir);
                if g_score.get(&next_key).is_none_or(|&old| next_g < old) {
                    g_score.insert(next_key, next_g);
                    came_from.insert(next_key, key);
                    let next_h = self.h(next_cell, q.goal);
                    open.push(Reverse((
                        next_g + self.costs.heuristic_weight * next_h,
                        next_h,
                        next_time,
                        next_cell,
                        eff_dir,
                    )));
                }
            }
        }

        // Budget exhausted. Under ignore_dynamic a partial advance is still
        // worth committing; under full constraints a partial path would
        // strand the AGV on someone's reservation, so fail instead.
        if q.ignore_dynamic && best.2 != start_key {
            return Some(self.reconstruct(&came_from, best.2, false));
        }
        None
    }

    fn h(&self, a: Cell, b: Cell) -> u32 {
        a.manhattan(b)
    }

    fn reconstruct(
        &self,
        came_from: &HashMap<StateKey, StateKey>,
        end: StateKey,
        reached_goal: bool,
    ) -> PlannedPath {
        let mut steps = Vec::new();
        let mut cur = end;
        loop {
            steps.push((cur.0, cur.1));
            match came_from.get(&cur) {
                Some(&prev) => cur = prev,
                None => break,
            }
        }
        steps.reverse();
        PlannedPath {
            steps,
            end_time: end.1,
            end_dir: end.2,
            reached_goal,
        }
    }
}
