//! Shuffle: evict a shelf that walls off the current goal into a nearby
//! buffer cell, using the stuck AGV itself as the mover.
//!
//! The whole eviction is all-or-nothing against world state: both legs are
//! planned (unconstrained, tunneling allowed) before anything is committed,
//! so a failed plan leaves no half-moved shelf and no orphan events. Every
//! committed eviction enqueues a cleanup record so a later idle pass puts
//! the shelf back at its home cell.

use crate::cleanup::CleanupTask;
use crate::FloorCtx;
use anyhow::Result;
use core_events::EventKind;
use core_world::{AgvId, Cell, CellKind, Dir, Sec};
use std::collections::{HashSet, VecDeque};

const BUFFER_BFS_RADIUS: u32 = 10;

impl FloorCtx<'_> {
    /// Move the first shelf adjacent to `target` aside. On success returns
    /// the AGV's new `(position, time)` — it ends standing on the buffer
    /// cell it just served.
    pub(crate) fn shuffle_aside(
        &mut self,
        me: AgvId,
        cur: Cell,
        target: Cell,
        now: Sec,
    ) -> Result<Option<(Cell, Sec)>> {
        let Some(blocker) = Dir::CARDINAL.into_iter().find_map(|d| {
            target
                .step(d)
                .filter(|&c| self.floor.grid.in_bounds(c) && self.floor.shelves.occupies(c))
        }) else {
            return Ok(None);
        };
        let Some(sid) = self.floor.shelves.sid_at(blocker).cloned() else {
            return Ok(None);
        };
        let Some(buffer) = self.shuffle_buffer(blocker, target) else {
            return Ok(None);
        };
        let step = self.cfg.timing.shuffle_step_secs;

        // Plan both legs up front; commit nothing on any failure.
        let Some(leg1) = self.plan(me, cur, blocker, now, Dir::Wait, false, true, true) else {
            return Ok(None);
        };
        if !leg1.reached_goal {
            return Ok(None);
        }
        let load_at = leg1.end_time;
        let Some(leg2) = self.plan(me, blocker, buffer, load_at + step, Dir::Wait, true, true, true)
        else {
            return Ok(None);
        };
        if !leg2.reached_goal {
            return Ok(None);
        }

        self.commit_path(me, &leg1)?;
        self.emit_agv(
            me,
            EventKind::ShuffleLoad,
            load_at,
            load_at + step,
            blocker,
            blocker,
            sid.to_string(),
        )?;
        self.floor.reservations.lock_spot(blocker, load_at, step, me);
        self.floor.shelves.lift(blocker);

        self.commit_path(me, &leg2)?;
        let unload_at = leg2.end_time;
        self.emit_agv(
            me,
            EventKind::ShuffleUnload,
            unload_at,
            unload_at + step,
            buffer,
            buffer,
            sid.to_string(),
        )?;
        self.floor
            .reservations
            .lock_spot(buffer, unload_at, step, me);
        self.floor.shelves.set_down(sid.clone(), buffer);
        self.floor.cleanup.push(CleanupTask {
            buffer,
            original: blocker,
            shelf: sid,
        });

        Ok(Some((buffer, unload_at + step)))
    }

    /// BFS (bounded radius) for a buffer: passable, shelf-free, not the
    /// goal, not a workstation cell. Storage cells win over aisle cells,
    /// nearer wins within a class.
    fn shuffle_buffer(&self, start: Cell, exclude: Cell) -> Option<Cell> {
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut best: Option<(u8, u32, Cell)> = None;
        while let Some(cur) = queue.pop_front() {
            let dist = start.manhattan(cur);
            if cur != start
                && cur != exclude
                && !self.floor.shelves.occupies(cur)
                && self.floor.grid.is_passable(cur)
                && !self.floor.grid.is_station(cur)
            {
                let class = if self.floor.grid.kind(cur) == CellKind::Storage {
                    0
                } else {
                    1
                };
                let key = (class, dist, cur);
                if best.is_none_or(|b| key < b) {
                    best = Some(key);
                }
            }
            if dist >= BUFFER_BFS_RADIUS {
                continue;
            }
            for next in self.floor.grid.passable_neighbors(cur) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        best.map(|(_, _, c)| c)
    }
}
