//! Segment mover: drive one AGV from its current cell to a target, loaded
//! or empty, surviving dynamic conflicts.
//!
//! Failures escalate through a fixed ladder keyed on seconds waited since
//! the segment began:
//!
//! 1. disconnected target → immediate forced teleport (`TELE_UNREACHABLE`)
//! 2. constrained A* — commit on success
//! 3. > 60 s → backtrack away from the goal, or teleport (`TELE_DEADLOCK`)
//! 4. > 3 s  → nudge a blocking vehicle to a sanctuary cell
//! 5. > 5 s  → shuffle a blocking shelf into a buffer cell
//! 6. > 20 s → replan with tunneling (shelf cells at high cost)
//! 7. > 45 s → replan unconstrained; failing that, teleport (`TELE_NO_PATH`)
//! 8. otherwise exponential backoff in place, capped at 5 s
//!
//! A teleport always advances time and forces position, so no segment can
//! loop forever. Loaded segments under `BlockedPolicy::Report` short-circuit
//! differently: when constrained planning fails but an unconstrained *empty*
//! probe shows a stored shelf astride the route, the mover hands
//! `PathBlocked` back to the dispatcher instead of escalating — carrying a
//! shelf through a forced teleport is reserved for the rescue script.

use crate::FloorCtx;
use anyhow::Result;
use core_events::EventKind;
use core_path::{PathQuery, Pathfinder, PlannedPath};
use core_world::{AgvId, Cell, Dir, Sec};
use std::collections::HashSet;
use thiserror::Error;

/// Why a forced teleport fired; lands in the event text for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleReason {
    Unreachable,
    Deadlock,
    NoPath,
}

impl TeleReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TeleReason::Unreachable => "TELE_UNREACHABLE",
            TeleReason::Deadlock => "TELE_DEADLOCK",
            TeleReason::NoPath => "TELE_NO_PATH",
        }
    }
}

/// The committed path crosses a stored shelf; only a rescue can clear it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("route blocked by stored shelf at {cell}")]
pub struct PathBlocked {
    pub cell: Cell,
}

/// What the mover may do when a loaded segment is shelf-blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedPolicy {
    /// Surface `PathBlocked` so the dispatcher can run the rescue protocol.
    Report,
    /// Keep climbing the ladder; teleporting is acceptable (rescue and
    /// restore legs, and tasks that have exhausted their retries).
    ForceThrough,
}

/// Final state of a completed segment. `tele` records a forced jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drive {
    pub pos: Cell,
    pub time: Sec,
    pub dir: Dir,
    pub tele: Option<TeleReason>,
}

pub type MoveResult = std::result::Result<Drive, PathBlocked>;

const BACKTRACK_AFTER: Sec = 60;
const NUDGE_AFTER: Sec = 3;
const SHUFFLE_AFTER: Sec = 5;
const TUNNEL_AFTER: Sec = 20;
const UNCONSTRAINED_AFTER: Sec = 45;
/// Surcharge applied after committing a tunneled or unconstrained path.
const ESCALATED_COMMIT_PENALTY: Sec = 30;
const TELE_UNREACHABLE_SECS: Sec = 120;
const TELE_SECS: Sec = 60;
const MAX_BACKOFF: Sec = 5;

impl FloorCtx<'_> {
    /// Drive `agvs[agv_idx]` to `target`. On `Ok(Ok(_))` the AGV state is
    /// updated and all movement events/reservations are committed; on
    /// `Ok(Err(PathBlocked))` nothing about the AGV changed.
    pub(crate) fn drive(
        &mut self,
        agv_idx: usize,
        target: Cell,
        loaded: bool,
        policy: BlockedPolicy,
        label: &'static str,
    ) -> Result<MoveResult> {
        let (me, mut cur, mut t, mut dir) = {
            let a = &self.floor.agvs[agv_idx];
            (a.id, a.pos, a.free_at, a.dir)
        };
        let mut tele = None;

        if cur != target && !self.floor.grid.connected(cur, target) {
            self.emit_agv(
                me,
                EventKind::ForceTele,
                t,
                t + TELE_UNREACHABLE_SECS,
                cur,
                target,
                TeleReason::Unreachable.as_str(),
            )?;
            self.monitor.log_teleport(label, TeleReason::Unreachable);
            t += TELE_UNREACHABLE_SECS;
            cur = target;
            dir = Dir::Wait;
            tele = Some(TeleReason::Unreachable);
            self.floor.reservations.reserve_cell(t, cur, me);
            return Ok(Ok(self.finish_drive(agv_idx, cur, t, dir, tele)));
        }

        let mut start_wait = t;
        let mut retry: u32 = 0;

        while cur != target {
            if t - start_wait > BACKTRACK_AFTER {
                if let Some(retreat) = self.backtrack_cell(me, cur, target) {
                    self.emit_agv(me, EventKind::Yield, t, t + 5, cur, retreat, "backtracking")?;
                    self.floor.reservations.lock_spot(retreat, t, 10, me);
                    cur = retreat;
                    dir = Dir::Wait;
                    t += 5;
                    start_wait = t;
                    continue;
                }
                self.emit_agv(
                    me,
                    EventKind::ForceTele,
                    t,
                    t + TELE_SECS,
                    cur,
                    target,
                    TeleReason::Deadlock.as_str(),
                )?;
                self.monitor.log_teleport(label, TeleReason::Deadlock);
                t += TELE_SECS;
                cur = target;
                dir = Dir::Wait;
                tele = Some(TeleReason::Deadlock);
                self.floor.reservations.reserve_cell(t, cur, me);
                break;
            }

            let mut escalated = false;
            let mut plan = self.plan(me, cur, target, t, dir, loaded, false, false);

            if plan.is_none()
                && loaded
                && policy == BlockedPolicy::Report
                && let Some(cell) = self.soft_blocker(me, cur, target, t, dir)
            {
                return Ok(Err(PathBlocked { cell }));
            }
            if plan.is_none()
                && t - start_wait > NUDGE_AFTER
                && let Some(cost) = self.nudge_blocker(me, cur, target, t)?
            {
                t += cost;
                continue;
            }
            if plan.is_none()
                && t - start_wait > SHUFFLE_AFTER
                && let Some((npos, nt)) = self.shuffle_aside(me, cur, target, t)?
            {
                cur = npos;
                t = nt;
                dir = Dir::Wait;
                continue;
            }
            if plan.is_none() && t - start_wait > TUNNEL_AFTER {
                plan = self.plan(me, cur, target, t, dir, loaded, false, true);
                escalated = plan.is_some();
            }
            if plan.is_none() && t - start_wait > UNCONSTRAINED_AFTER {
                plan = self.plan(me, cur, target, t, dir, loaded, true, true);
                escalated = escalated || plan.is_some();
                if plan.is_none() {
                    self.emit_agv(
                        me,
                        EventKind::ForceTele,
                        t,
                        t + TELE_SECS,
                        cur,
                        target,
                        TeleReason::NoPath.as_str(),
                    )?;
                    self.monitor.log_teleport(label, TeleReason::NoPath);
                    t += TELE_SECS;
                    cur = target;
                    dir = Dir::Wait;
                    tele = Some(TeleReason::NoPath);
                    self.floor.reservations.reserve_cell(t, cur, me);
                    break;
                }
            }

            match plan {
                Some(p) => {
                    self.commit_path(me, &p)?;
                    cur = p.end_cell();
                    t = p.end_time;
                    dir = p.end_dir;
                    if escalated {
                        self.floor
                            .reservations
                            .lock_spot(cur, t, ESCALATED_COMMIT_PENALTY, me);
                        t += ESCALATED_COMMIT_PENALTY;
                    }
                    // An unconstrained plan may be partial; the loop then
                    // replans from the new position.
                }
                None => {
                    let backoff = (1i64 << retry.min(3)).min(MAX_BACKOFF);
                    self.floor.reservations.lock_spot(cur, t, backoff, me);
                    t += backoff;
                    retry += 1;
                }
            }
        }

        Ok(Ok(self.finish_drive(agv_idx, cur, t, dir, tele)))
    }

    fn finish_drive(&mut self, agv_idx: usize, pos: Cell, time: Sec, dir: Dir, tele: Option<TeleReason>) -> Drive {
        let a = &mut self.floor.agvs[agv_idx];
        a.pos = pos;
        a.free_at = time;
        a.dir = dir;
        Drive {
            pos,
            time,
            dir,
            tele,
        }
    }

    /// One constrained (or deliberately unconstrained) planning attempt.
    pub(crate) fn plan(
        &self,
        me: AgvId,
        start: Cell,
        goal: Cell,
        t: Sec,
        dir: Dir,
        loaded: bool,
        ignore_dynamic: bool,
        tunnel: bool,
    ) -> Option<PlannedPath> {
        let blockers = if ignore_dynamic {
            HashSet::new()
        } else {
            self.floor.standing_blockers(me)
        };
        let pf = Pathfinder::new(
            &self.floor.grid,
            &self.floor.reservations,
            self.floor.shelves.occupancy(),
            &blockers,
            self.costs,
        );
        pf.find(
            &PathQuery::new(start, goal, t, dir)
                .loaded(loaded)
                .ignore_dynamic(ignore_dynamic)
                .allow_tunneling(tunnel),
        )
    }

    /// Probe the soft route (unconstrained, empty) for a stored shelf
    /// between the endpoints — the signature of a shelf-walled goal.
    fn soft_blocker(&self, me: AgvId, cur: Cell, target: Cell, t: Sec, dir: Dir) -> Option<Cell> {
        let p = self.plan(me, cur, target, t, dir, false, true, false)?;
        if !p.reached_goal || p.steps.len() < 3 {
            return None;
        }
        p.steps[1..p.steps.len() - 1]
            .iter()
            .map(|&(c, _)| c)
            .find(|&c| self.floor.shelves.occupies(c))
    }

    /// Write a planned path into the world: per-step move events, cell
    /// claims at arrival seconds, and swap-guard edge claims.
    pub(crate) fn commit_path(&mut self, me: AgvId, p: &PlannedPath) -> Result<()> {
        if let Some(&(c0, t0)) = p.steps.first() {
            self.floor.reservations.reserve_cell(t0, c0, me);
        }
        for w in p.steps.windows(2) {
            let (c0, t0) = w[0];
            let (c1, t1) = w[1];
            self.floor.reservations.reserve_edge(t0, c0, c1, me);
            self.floor.reservations.reserve_cell(t1, c1, me);
            self.emit_agv(me, EventKind::AgvMove, t0, t1, c0, c1, "")?;
        }
        Ok(())
    }
}
