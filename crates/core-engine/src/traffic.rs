//! Traffic control: nudge a standing vehicle out of a planned corridor, or
//! back a stuck vehicle away from its goal.
//!
//! The blocker search is deliberately cheap — walk the Manhattan line from
//! the stuck AGV toward its goal (rows first) for at most six cells and
//! take the first cell occupied by another vehicle. The sanctuary search is
//! a bounded BFS for any passable cell that is free of vehicles and not
//! reserved over the next few seconds. The nudge is instantaneous in the
//! state model; the yield cost (2 s per cell) is charged to the *stuck*
//! AGV's clock, and the sanctuary is pinned long enough for the nudged
//! vehicle to be treated as settled there.

use crate::FloorCtx;
use anyhow::Result;
use core_events::EventKind;
use core_world::{AgvId, Cell, Dir, Sec};
use std::collections::{HashSet, VecDeque};

const BLOCKER_SCAN_CELLS: usize = 6;
const SANCTUARY_BFS_LIMIT: usize = 100;
const SANCTUARY_CLEAR_SECS: Sec = 2;

impl FloorCtx<'_> {
    /// Find and relocate the first vehicle standing on the Manhattan line
    /// toward `goal`. Returns the seconds to charge the caller, or `None`
    /// when there is no blocker or no sanctuary for it.
    pub(crate) fn nudge_blocker(
        &mut self,
        me: AgvId,
        from: Cell,
        goal: Cell,
        now: Sec,
    ) -> Result<Option<Sec>> {
        let Some((blocker_idx, blocker_pos, walked)) = self.path_blocker(me, from, goal) else {
            return Ok(None);
        };
        // Never settle the blocker back onto the corridor being cleared.
        let mut off_limits: HashSet<Cell> = walked.into_iter().collect();
        off_limits.insert(from);
        off_limits.insert(goal);
        let Some(sanctuary) = self.find_sanctuary(blocker_pos, now, &off_limits) else {
            return Ok(None);
        };
        let blocker = self.floor.agvs[blocker_idx].id;
        let cost = blocker_pos.manhattan(sanctuary) as Sec * 2;
        self.floor.agvs[blocker_idx].pos = sanctuary;
        self.floor.agvs[blocker_idx].dir = Dir::Wait;
        self.floor
            .reservations
            .lock_spot(sanctuary, now, cost + 5, blocker);
        self.emit_agv(
            blocker,
            EventKind::Yield,
            now,
            now + cost,
            blocker_pos,
            sanctuary,
            format!("yield for {me}"),
        )?;
        Ok(Some(cost))
    }

    /// First other vehicle on the rows-then-cols walk from `from` toward
    /// `goal`, along with the cells walked to reach it.
    fn path_blocker(&self, me: AgvId, from: Cell, goal: Cell) -> Option<(usize, Cell, Vec<Cell>)> {
        let mut cur = from;
        let mut walked = Vec::new();
        for _ in 0..BLOCKER_SCAN_CELLS {
            if cur == goal {
                return None;
            }
            cur = if cur.row < goal.row {
                Cell::new(cur.row + 1, cur.col)
            } else if cur.row > goal.row {
                Cell::new(cur.row - 1, cur.col)
            } else if cur.col < goal.col {
                Cell::new(cur.row, cur.col + 1)
            } else {
                Cell::new(cur.row, cur.col - 1)
            };
            walked.push(cur);
            if let Some(idx) = self
                .floor
                .agvs
                .iter()
                .position(|a| a.id != me && a.pos == cur)
            {
                return Some((idx, cur, walked));
            }
        }
        None
    }

    /// Bounded BFS from the blocker for a settle-down cell: passable, not
    /// currently reserved, not under any vehicle, not in `off_limits`.
    fn find_sanctuary(&self, start: Cell, now: Sec, off_limits: &HashSet<Cell>) -> Option<Cell> {
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut inspected = 0usize;
        while let Some(cur) = queue.pop_front() {
            inspected += 1;
            if inspected > SANCTUARY_BFS_LIMIT {
                return None;
            }
            if cur != start && !off_limits.contains(&cur) {
                let reserved = (0..=SANCTUARY_CLEAR_SECS)
                    .any(|dt| self.floor.reservations.is_cell_reserved(now + dt, cur));
                let occupied = self.floor.agvs.iter().any(|a| a.pos == cur);
                if !reserved && !occupied {
                    return Some(cur);
                }
            }
            for next in self.floor.grid.passable_neighbors(cur) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Free neighbor of `cur` that maximizes distance from `goal` — the
    /// give-way move after the deadlock window expires.
    pub(crate) fn backtrack_cell(&self, _me: AgvId, cur: Cell, goal: Cell) -> Option<Cell> {
        let mut best: Option<(u32, Cell)> = None;
        for d in Dir::CARDINAL {
            let Some(next) = cur.step(d) else { continue };
            if !self.floor.grid.is_passable(next) {
                continue;
            }
            if self.floor.agvs.iter().any(|a| a.pos == next) {
                continue;
            }
            let dist = next.manhattan(goal);
            if best.is_none_or(|(bd, _)| dist > bd) {
                best = Some((dist, next));
            }
        }
        best.map(|(_, c)| c)
    }
}
