//! Per-floor dispatcher.
//!
//! One outer loop drains the floor: pick the least-recently-busy AGV (the
//! smallest clock, ties by id), decide one `Step` for it, execute that step
//! to completion, repeat. Rescues preempt everything; pending shelf
//! restorations come next; then the best admissible station queue head; a
//! fruitless round parks the AGV for a few seconds. Because each step runs
//! start-to-finish, a "later" AGV can execute while an earlier one is still
//! mid-task in simulated time — the physical-queue and reservation state
//! machines are what keep those interleaved timelines honest.

use crate::mover::{BlockedPolicy, PathBlocked};
use crate::task::{RescueTask, Task};
use crate::{CleanupTask, FloorCtx};
use anyhow::Result;
use core_events::{EventKind, KpiRecord, StationStatus, TaskKind};
use core_station::{Advance, StationId};
use core_world::{Cell, Dir, Sec, ShelfId};
use tracing::{debug, warn};

/// A task that keeps bouncing gets its blocked legs forced through rather
/// than retried forever; the teleport is the loop terminator of last resort.
const MAX_SOFT_RETRIES: u32 = 10;

/// One decision of the outer loop.
enum Step {
    Park,
    Rescue(RescueTask),
    Restore(CleanupTask),
    Run { sid: StationId, task: Task },
}

impl FloorCtx<'_> {
    /// Emit the initial world snapshot: every station idle, every AGV at
    /// its spawn cell.
    pub(crate) fn bootstrap(&mut self) -> Result<()> {
        let stations: Vec<(StationId, Cell)> = self
            .floor
            .stations
            .iter()
            .map(|(s, c)| (s.clone(), *c))
            .collect();
        for (sid, cell) in stations {
            self.emit_ws(
                &sid,
                EventKind::StationStatus,
                0,
                1,
                cell,
                StationStatus::idle().to_string(),
            )?;
        }
        let agvs: Vec<(core_world::AgvId, Cell)> =
            self.floor.agvs.iter().map(|a| (a.id, a.pos)).collect();
        for (id, pos) in agvs {
            self.emit_agv(id, EventKind::Init, 0, 1, pos, pos, "")?;
        }
        Ok(())
    }

    pub(crate) fn dispatch_loop(&mut self) -> Result<()> {
        if self.floor.agvs.is_empty() {
            warn!(target: "dispatch", floor = %self.floor.name, "no vehicles; dropping all queued work");
            self.floor.station_tasks.clear();
            self.floor.rescue_queue.clear();
            return Ok(());
        }
        while self.floor.has_work() {
            let agv_idx = self.pick_agv();
            match self.choose_step(agv_idx) {
                Step::Park => self.park(agv_idx),
                Step::Rescue(r) => self.run_rescue(agv_idx, r)?,
                Step::Restore(c) => self.run_restore(agv_idx, c)?,
                Step::Run { sid, task } => self.run_task(agv_idx, sid, task)?,
            }
        }
        Ok(())
    }

    /// Least-recently-busy rule: smallest clock, ties broken by id.
    fn pick_agv(&self) -> usize {
        self.floor
            .agvs
            .iter()
            .enumerate()
            .min_by_key(|(_, a)| (a.free_at, a.id))
            .map(|(i, _)| i)
            .expect("dispatch_loop guards against an empty fleet")
    }

    fn choose_step(&mut self, agv_idx: usize) -> Step {
        if let Some(r) = self.floor.rescue_queue.pop_front() {
            return Step::Rescue(r);
        }
        let me = self.floor.agvs[agv_idx].id;
        let now = self.floor.agvs[agv_idx].free_at;
        let pos = self.floor.agvs[agv_idx].pos;
        if let Some(c) = self.floor.cleanup.take_nearest(pos) {
            return Step::Restore(c);
        }

        // Score every admissible station head; smallest release-plus-retry
        // score wins. BTreeMap order makes ties deterministic.
        let mut best: Option<(Sec, StationId)> = None;
        for (sid, queue) in &self.floor.station_tasks {
            let Some(head) = queue.front() else { continue };
            if self.floor.zm.total_load(sid) >= self.floor.pqm.queue_capacity(sid) {
                continue;
            }
            if head.assigned_agv.is_some_and(|owner| owner != me) {
                continue;
            }
            if self.floor.rescue_locks.contains(&head.shelf) {
                continue;
            }
            if head.release > now {
                continue;
            }
            let retries = self.floor.retry_counter.get(&head.id).copied().unwrap_or(0);
            let score = head.release + retries as Sec * self.cfg.dispatch.retry_penalty_secs;
            if best.as_ref().is_none_or(|(bs, _)| score < *bs) {
                best = Some((score, sid.clone()));
            }
        }
        if let Some((_, sid)) = best {
            let task = self
                .floor
                .station_tasks
                .get_mut(&sid)
                .and_then(|q| q.pop_front())
                .expect("scored head exists");
            if !task.is_retry {
                self.floor.zm.reserve(&sid);
            }
            return Step::Run { sid, task };
        }
        Step::Park
    }

    /// Nothing runnable: hold the cell and let the clock tick forward.
    fn park(&mut self, agv_idx: usize) {
        let (id, pos, t) = {
            let a = &self.floor.agvs[agv_idx];
            (a.id, a.pos, a.free_at)
        };
        let wait = self.cfg.timing.park_wait_secs;
        self.floor.reservations.lock_spot(pos, t, wait * 2, id);
        self.floor.agvs[agv_idx].free_at = t + wait;
    }

    fn retries_of(&self, task: &Task) -> u32 {
        self.floor.retry_counter.get(&task.id).copied().unwrap_or(0)
    }

    // ---------------------------------------------------------------------
    // Normal task macro-script
    // ---------------------------------------------------------------------

    fn run_task(&mut self, agv_idx: usize, sid: StationId, mut task: Task) -> Result<()> {
        let me = self.floor.agvs[agv_idx].id;
        let Some(stop) = task.first_stop().cloned() else {
            self.floor.zm.cancel_reserve(&sid);
            return Ok(());
        };
        let handling = self.cfg.timing.shelf_handling_secs;
        let policy = if self.retries_of(&task) > MAX_SOFT_RETRIES {
            BlockedPolicy::ForceThrough
        } else {
            BlockedPolicy::Report
        };

        // a/b) pickup, unless a previous attempt already has the shelf on
        // this AGV's back.
        if !task.skip_pickup {
            let Some(shelf_pos) = self.floor.shelves.position(&task.shelf) else {
                warn!(target: "dispatch", task = %task.id, shelf = %task.shelf, "unknown shelf, task skipped");
                self.floor.zm.cancel_reserve(&sid);
                return self.after_task();
            };
            match self.drive(agv_idx, shelf_pos, false, policy, "LOAD")? {
                Ok(_) => {}
                Err(PathBlocked { cell }) => {
                    return self.abort_blocked_pickup(agv_idx, sid, task, cell);
                }
            }
            let t = self.floor.agvs[agv_idx].free_at;
            self.emit_agv(
                me,
                EventKind::ShelfLoad,
                t,
                t + handling,
                shelf_pos,
                shelf_pos,
                task.shelf.to_string(),
            )?;
            self.floor.reservations.lock_spot(shelf_pos, t, handling, me);
            self.floor.shelves.lift(shelf_pos);
            self.floor.agvs[agv_idx].free_at = t + handling;
            task.carry_origin = Some(shelf_pos);
            self.monitor.log_success("LOAD");
        }

        // c) enter the zone and claim a physical slot.
        self.floor.zm.enter(&sid);
        let now = self.floor.agvs[agv_idx].free_at;
        let Some(grant) = self.floor.pqm.allocate_slot(&sid, me, now) else {
            // Admission keeps load below slot count, so this is a logic
            // hiccup, not a normal state; rebind and retry shortly.
            debug!(target: "dispatch", %sid, "no free slot despite admission; rebinding");
            self.floor.zm.demote_to_en_route(&sid);
            task.skip_pickup = task.carry_origin.is_some();
            task.is_retry = true;
            task.assigned_agv = Some(me);
            self.requeue_front(&sid, task);
            self.floor.agvs[agv_idx].free_at += self.cfg.timing.park_wait_secs;
            return Ok(());
        };
        self.wait_in_place(agv_idx, grant.available);

        // d) loaded leg into the queue. A shelf-blocked route here spawns a
        // rescue and replays the task from the skip-pickup state — the AGV
        // keeps the shelf, and nothing teleports while it is loaded.
        match self.drive(agv_idx, grant.cell, true, policy, "QUEUE")? {
            Ok(_) => {}
            Err(PathBlocked { cell }) => {
                if let Some(bsid) = self.floor.shelves.sid_at(cell).cloned() {
                    self.floor
                        .rescue_queue
                        .push_front(RescueTask { shelf: bsid });
                }
                *self.floor.retry_counter.entry(task.id.clone()).or_default() += 1;
                task.skip_pickup = true;
                task.is_retry = true;
                task.assigned_agv = Some(me);
                self.floor.zm.demote_to_en_route(&sid);
                self.floor.pqm.free_slot(&sid, me, grant.idx);
                self.requeue_front(&sid, task);
                self.floor.agvs[agv_idx].free_at += self.cfg.timing.park_wait_secs;
                return Ok(());
            }
        }

        // e) advance through the slots to the processing cell.
        let qmove = self.cfg.timing.queue_move_secs;
        let mut idx = grant.idx;
        loop {
            let now = self.floor.agvs[agv_idx].free_at;
            match self.floor.pqm.advance_slot(&sid, me, idx, now, qmove) {
                Some(Advance::ToStation { cell, start }) => {
                    self.wait_in_place(agv_idx, start);
                    self.queue_hop(agv_idx, cell)?;
                    break;
                }
                Some(Advance::ToSlot { cell, start, idx: next_idx }) => {
                    self.wait_in_place(agv_idx, start);
                    self.queue_hop(agv_idx, cell)?;
                    idx = next_idx;
                }
                None => {
                    warn!(target: "dispatch", %sid, agv = %me, "lost slot ownership mid-queue");
                    self.floor.agvs[agv_idx].free_at += qmove;
                    break;
                }
            }
        }
        self.monitor.log_success("QUEUE");

        // f) processing at the station.
        let t = self.floor.agvs[agv_idx].free_at;
        let station_cell = self.floor.agvs[agv_idx].pos;
        let leave = t + stop.processing_secs;
        let deadline = self.cfg.timing.deadline_hours * 3600;
        let status = StationStatus::working(task.is_inbound(), task.wave_id.clone(), leave > deadline);
        self.emit_ws(&sid, EventKind::StationStatus, t, leave, station_cell, status.to_string())?;
        self.emit_agv(
            me,
            EventKind::Picking,
            t,
            leave,
            station_cell,
            station_cell,
            format!("{} items", task.items),
        )?;
        self.floor
            .reservations
            .lock_spot(station_cell, t, stop.processing_secs, me);
        self.floor.agvs[agv_idx].free_at = leave;

        // g) hand the station back.
        self.floor.pqm.process_finished(&sid, me, leave);
        self.floor.pqm.release_station(&sid, me);
        self.floor.zm.exit(&sid);
        self.monitor.log_success("VISIT");

        // Side-step to the queue exit so the next AGV can take the cell.
        let exit = self
            .floor
            .pqm
            .exits(&sid)
            .iter()
            .copied()
            .find(|&c| self.floor.grid.is_passable(c));
        if let Some(exit) = exit {
            // A walled-in exit lane is not worth a rescue; a blocked side
            // step just means returning directly from the station cell.
            let _ = self.drive(agv_idx, exit, true, BlockedPolicy::Report, "EXIT")?;
        }

        // h/i) return the shelf to storage.
        self.return_shelf(agv_idx, &task)?;

        // j) one KPI row per completed task.
        let finish = self.floor.agvs[agv_idx].free_at;
        let total = self.wave_totals.get(&task.wave_id).copied().unwrap_or(0);
        self.sink.emit_kpi(KpiRecord {
            finish: self.clock.at(finish),
            kind: if task.is_inbound() {
                TaskKind::Inbound
            } else {
                TaskKind::Outbound
            },
            wave_id: task.wave_id.clone(),
            delayed: finish > deadline,
            workstation: sid.clone(),
            total_in_wave: total,
            deadline_ts: self.clock.deadline_ts(self.cfg.timing.deadline_hours),
        })?;

        // Retreat off the storage cell so the dropped shelf stays servable.
        self.park_after_task(agv_idx)?;
        self.after_task()
    }

    fn return_shelf(&mut self, agv_idx: usize, task: &Task) -> Result<()> {
        let me = self.floor.agvs[agv_idx].id;
        let origin = task.carry_origin;
        for _ in 0..3 {
            let from = self.floor.agvs[agv_idx].pos;
            let Some(drop) = self.pick_return_cell(from, origin) else {
                break;
            };
            match self.drive(agv_idx, drop, true, BlockedPolicy::Report, "RETURN")? {
                Ok(_) => return self.place_carried(agv_idx, &task.shelf, drop),
                Err(PathBlocked { .. }) => continue,
            }
        }
        // Retargeting exhausted: fall back to the vacated origin cell if it
        // is still free, else force through to any spot.
        let fallback = match origin {
            Some(o) if !self.floor.shelves.occupies(o) => Some(o),
            _ => {
                let from = self.floor.agvs[agv_idx].pos;
                self.pick_return_cell(from, None)
            }
        };
        let drop = fallback.unwrap_or(self.floor.agvs[agv_idx].pos);
        if self.floor.agvs[agv_idx].pos != drop {
            let _ = self.drive(agv_idx, drop, true, BlockedPolicy::ForceThrough, "RETURN")?;
        }
        if self.floor.shelves.occupies(drop) {
            warn!(target: "dispatch", agv = %me, at = %drop, "no free drop cell; shelf left on carrier cell");
        }
        self.place_carried(agv_idx, &task.shelf, drop)
    }

    fn place_carried(&mut self, agv_idx: usize, shelf: &ShelfId, at: Cell) -> Result<()> {
        let me = self.floor.agvs[agv_idx].id;
        let handling = self.cfg.timing.shelf_handling_secs;
        let t = self.floor.agvs[agv_idx].free_at;
        self.emit_agv(me, EventKind::ShelfUnload, t, t + handling, at, at, shelf.to_string())?;
        self.floor.reservations.lock_spot(at, t, handling, me);
        self.floor.shelves.set_down(shelf.clone(), at);
        self.floor.agvs[agv_idx].free_at = t + handling;
        self.monitor.log_success("RETURN");
        Ok(())
    }

    fn park_after_task(&mut self, agv_idx: usize) -> Result<()> {
        let Some(park) = self.pick_parking_cell() else {
            return Ok(());
        };
        if park == self.floor.agvs[agv_idx].pos {
            return Ok(());
        }
        let drive = self.drive(agv_idx, park, false, BlockedPolicy::ForceThrough, "PARK")?;
        if let Ok(d) = drive
            && d.tele.is_none()
        {
            let me = self.floor.agvs[agv_idx].id;
            self.emit_agv(me, EventKind::Parking, d.time, d.time + 1, park, park, "idle")?;
            self.monitor.log_success("PARK");
        }
        Ok(())
    }

    fn abort_blocked_pickup(
        &mut self,
        agv_idx: usize,
        sid: StationId,
        task: Task,
        blocker: Cell,
    ) -> Result<()> {
        if let Some(bsid) = self.floor.shelves.sid_at(blocker).cloned() {
            self.floor.rescue_queue.push_front(RescueTask { shelf: bsid });
            self.floor.rescue_locks.insert(task.shelf.clone());
        }
        *self.floor.retry_counter.entry(task.id.clone()).or_default() += 1;
        self.floor.zm.cancel_reserve(&sid);
        self.requeue_front(&sid, task);
        self.floor.agvs[agv_idx].free_at += self.cfg.timing.park_wait_secs;
        Ok(())
    }

    fn requeue_front(&mut self, sid: &StationId, task: Task) {
        self.floor
            .station_tasks
            .entry(sid.clone())
            .or_default()
            .push_front(task);
    }

    // ---------------------------------------------------------------------
    // Rescue macro-script
    // ---------------------------------------------------------------------

    /// Haul the obstructing shelf to a fresh storage spot. Teleports are
    /// tolerated here: a wedged rescue would stall the whole floor.
    fn run_rescue(&mut self, agv_idx: usize, rescue: RescueTask) -> Result<()> {
        let me = self.floor.agvs[agv_idx].id;
        let step = self.cfg.timing.shuffle_step_secs;
        let Some(shelf_pos) = self.floor.shelves.position(&rescue.shelf) else {
            // Already moved by a shuffle or a competing rescue.
            self.floor.rescue_locks.clear();
            return Ok(());
        };
        let _ = self.drive(agv_idx, shelf_pos, false, BlockedPolicy::ForceThrough, "RESCUE")?;

        let t = self.floor.agvs[agv_idx].free_at;
        self.emit_agv(
            me,
            EventKind::ShuffleLoad,
            t,
            t + step,
            shelf_pos,
            shelf_pos,
            rescue.shelf.to_string(),
        )?;
        self.floor.reservations.lock_spot(shelf_pos, t, step, me);
        self.floor.shelves.lift(shelf_pos);
        self.floor.agvs[agv_idx].free_at = t + step;

        let Some(buffer) = self.pick_return_cell(shelf_pos, Some(shelf_pos)) else {
            // Nowhere to put it: restore in place and let the task retry.
            let t = self.floor.agvs[agv_idx].free_at;
            self.emit_agv(
                me,
                EventKind::ShuffleUnload,
                t,
                t + step,
                shelf_pos,
                shelf_pos,
                rescue.shelf.to_string(),
            )?;
            self.floor.shelves.set_down(rescue.shelf.clone(), shelf_pos);
            self.floor.agvs[agv_idx].free_at = t + step;
            self.floor.rescue_locks.clear();
            return Ok(());
        };

        let _ = self.drive(agv_idx, buffer, true, BlockedPolicy::ForceThrough, "RESCUE")?;
        let t = self.floor.agvs[agv_idx].free_at;
        self.emit_agv(
            me,
            EventKind::ShuffleUnload,
            t,
            t + step,
            buffer,
            buffer,
            rescue.shelf.to_string(),
        )?;
        self.floor.reservations.lock_spot(buffer, t, step, me);
        self.floor.shelves.set_down(rescue.shelf.clone(), buffer);
        self.floor.agvs[agv_idx].free_at = t + step;
        self.floor.rescue_locks.clear();
        self.monitor.log_success("RESCUE");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Restore pass (shuffle debt repayment)
    // ---------------------------------------------------------------------

    fn run_restore(&mut self, agv_idx: usize, c: CleanupTask) -> Result<()> {
        let me = self.floor.agvs[agv_idx].id;
        let step = self.cfg.timing.shuffle_step_secs;
        // The buffered shelf may have been re-homed since the debt was
        // recorded; a stale record is simply dropped.
        if self.floor.shelves.sid_at(c.buffer) != Some(&c.shelf) {
            return Ok(());
        }
        let _ = self.drive(agv_idx, c.buffer, false, BlockedPolicy::ForceThrough, "RESTORE")?;

        let t = self.floor.agvs[agv_idx].free_at;
        self.emit_agv(
            me,
            EventKind::ShuffleLoad,
            t,
            t + step,
            c.buffer,
            c.buffer,
            format!("restore {}", c.shelf),
        )?;
        self.floor.reservations.lock_spot(c.buffer, t, step, me);
        self.floor.shelves.lift(c.buffer);
        self.floor.agvs[agv_idx].free_at = t + step;

        let home_free =
            self.floor.grid.is_storage(c.original) && !self.floor.shelves.occupies(c.original);
        let target = if home_free {
            c.original
        } else {
            self.pick_return_cell(c.buffer, None).unwrap_or(c.buffer)
        };
        if target != c.buffer {
            let _ = self.drive(agv_idx, target, true, BlockedPolicy::ForceThrough, "RESTORE")?;
        }
        let t = self.floor.agvs[agv_idx].free_at;
        self.emit_agv(
            me,
            EventKind::ShuffleUnload,
            t,
            t + step,
            target,
            target,
            format!("restore {}", c.shelf),
        )?;
        self.floor.reservations.lock_spot(target, t, step, me);
        self.floor.shelves.set_down(c.shelf.clone(), target);
        self.floor.agvs[agv_idx].free_at = t + step;
        self.monitor.log_success("RESTORE");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Small shared motions
    // ---------------------------------------------------------------------

    /// Hold position until `until`, keeping the cell reserved meanwhile.
    fn wait_in_place(&mut self, agv_idx: usize, until: Sec) {
        let (id, pos, t) = {
            let a = &self.floor.agvs[agv_idx];
            (a.id, a.pos, a.free_at)
        };
        if until > t {
            self.floor.reservations.lock_spot(pos, t, until - t, id);
            self.floor.agvs[agv_idx].free_at = until;
        }
    }

    /// One-cell queue advance; slot ownership already guarantees the lane,
    /// so this bypasses the pathfinder.
    fn queue_hop(&mut self, agv_idx: usize, to: Cell) -> Result<()> {
        let (id, pos, t) = {
            let a = &self.floor.agvs[agv_idx];
            (a.id, a.pos, a.free_at)
        };
        let qmove = self.cfg.timing.queue_move_secs;
        self.floor.reservations.lock_spot(pos, t, qmove, id);
        self.floor.reservations.reserve_cell(t + qmove, to, id);
        self.emit_agv(id, EventKind::AgvMove, t, t + qmove, pos, to, "")?;
        let a = &mut self.floor.agvs[agv_idx];
        a.pos = to;
        a.free_at = t + qmove;
        a.dir = Dir::Wait;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Cadenced housekeeping
    // ---------------------------------------------------------------------

    fn after_task(&mut self) -> Result<()> {
        self.floor.done += 1;
        self.monitor.task_completed();
        let every = self.cfg.dispatch.heartbeat_every;
        if every > 0 && self.floor.done % every == 0 {
            self.emit_heartbeats()?;
            self.monitor
                .progress(&self.floor.name.clone(), self.floor.done, self.floor.queued_tasks());
        }
        let sweep = self.cfg.reserve.cleanup_every;
        if sweep > 0 && self.floor.done % sweep == 0 {
            let fleet_min = self.floor.fleet_min_time();
            self.floor.reservations.cleanup(fleet_min);
        }
        Ok(())
    }

    fn emit_heartbeats(&mut self) -> Result<()> {
        let t = self.floor.fleet_min_time();
        let stations: Vec<(StationId, Cell)> = self
            .floor
            .stations
            .iter()
            .map(|(s, c)| (s.clone(), *c))
            .collect();
        for (sid, cell) in stations {
            let queued = self
                .floor
                .station_tasks
                .get(&sid)
                .map_or(0, |q| q.len());
            let text = format!("load={} queued={}", self.floor.zm.total_load(&sid), queued);
            self.emit_ws(&sid, EventKind::Heartbeat, t, t + 1, cell, text)?;
        }
        Ok(())
    }
}
