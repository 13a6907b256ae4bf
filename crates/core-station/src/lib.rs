//! Workstation-side state machines.
//!
//! Two cooperating layers guard every station:
//!
//! * `PhysicalQueueManager` — the hard FIFO of three physical queue cells
//!   along the aisle plus the processing cell itself. Slot ownership is
//!   explicit; an AGV advances one slot at a time and never overtakes.
//! * `ZoneManager` — the soft admission counter consulted *before* an AGV
//!   is even dispatched toward a station (`en_route + occupied` against a
//!   capacity). It keeps the approach corridor from saturating long before
//!   anyone touches a physical slot.
//!
//! The split matters: admission is a dispatch-time decision, slot ownership
//! is an arrival-time one, and the two disagree transiently while an AGV is
//! driving over. Capacity 4 = 3 queue cells + 1 processing cell.

use core_world::{AgvId, Cell, Sec};
use std::collections::BTreeMap;
use std::fmt;

mod zone;
pub use zone::ZoneManager;

/// Station identifier of the form `"<floor>_<n>"`, e.g. `"2F_3"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub String);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        StationId(s.to_string())
    }
}

pub const QUEUE_SLOTS: usize = 3;

/// Sentinel meaning "held by its occupant, not schedulable".
const SLOT_HELD: Sec = Sec::MAX;

/// Aisle side the queue extends toward: stations on the left half of the
/// hall queue rightward, and vice versa.
fn queue_direction(station: Cell) -> i16 {
    if station.col < 30 { 1 } else { -1 }
}

/// A granted queue slot: where to drive, when the slot is actually free to
/// stand on, and its depth index (0 = adjacent to the processing cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrant {
    pub cell: Cell,
    pub available: Sec,
    pub idx: usize,
}

/// Outcome of one queue advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Move up one slot; `start` is when the target slot is vacated.
    ToSlot { cell: Cell, start: Sec, idx: usize },
    /// Head of the queue: move onto the processing cell at `start`.
    ToStation { cell: Cell, start: Sec },
}

#[derive(Debug, Clone)]
struct StationQueue {
    station_pos: Cell,
    slots: [Cell; QUEUE_SLOTS],
    exits: Vec<Cell>,
    occupants: [Option<AgvId>; QUEUE_SLOTS],
    processing: Option<AgvId>,
    station_free_at: Sec,
    slot_free_at: [Sec; QUEUE_SLOTS],
}

impl StationQueue {
    fn new(station_pos: Cell) -> Self {
        let dir = queue_direction(station_pos);
        let slot = |i: i16| {
            Cell::new(
                station_pos.row,
                station_pos.col.saturating_add_signed(dir * i),
            )
        };
        let slots = [slot(1), slot(2), slot(3)];
        let mut exits = Vec::with_capacity(2);
        if let Some(row) = station_pos.row.checked_sub(1) {
            exits.push(Cell::new(row, slots[0].col));
        }
        exits.push(Cell::new(station_pos.row + 1, slots[0].col));
        Self {
            station_pos,
            slots,
            exits,
            occupants: [None; QUEUE_SLOTS],
            processing: None,
            station_free_at: 0,
            slot_free_at: [0; QUEUE_SLOTS],
        }
    }
}

/// Per-floor registry of station queues. Single-writer: only the dispatcher
/// driving a station's current AGV mutates that station's entry.
#[derive(Debug, Default)]
pub struct PhysicalQueueManager {
    queues: BTreeMap<StationId, StationQueue>,
}

impl PhysicalQueueManager {
    pub fn new(stations: &BTreeMap<StationId, Cell>) -> Self {
        let queues = stations
            .iter()
            .map(|(sid, &pos)| (sid.clone(), StationQueue::new(pos)))
            .collect();
        Self { queues }
    }

    /// Candidate side-exit cells next to the first queue slot. The caller
    /// picks the first one that is passable on its floor.
    pub fn exits(&self, sid: &StationId) -> &[Cell] {
        self.queues.get(sid).map(|q| q.exits.as_slice()).unwrap_or(&[])
    }

    /// True while the entry (deepest-index) slot is unclaimed.
    pub fn has_vacancy(&self, sid: &StationId) -> bool {
        self.queues
            .get(sid)
            .is_some_and(|q| q.occupants[QUEUE_SLOTS - 1].is_none())
    }

    pub fn queue_capacity(&self, sid: &StationId) -> usize {
        if self.queues.contains_key(sid) {
            QUEUE_SLOTS
        } else {
            0
        }
    }

    pub fn processing(&self, sid: &StationId) -> Option<AgvId> {
        self.queues.get(sid).and_then(|q| q.processing)
    }

    /// Claim the deepest free slot — the free slot nearest the processing
    /// cell — so arrivals stack up in FIFO order. The slot is held (no
    /// schedulable free time) until its occupant advances out of it.
    pub fn allocate_slot(&mut self, sid: &StationId, agv: AgvId, now: Sec) -> Option<SlotGrant> {
        let q = self.queues.get_mut(sid)?;
        let idx = q.occupants.iter().position(|o| o.is_none())?;
        q.occupants[idx] = Some(agv);
        let available = now.max(q.slot_free_at[idx]);
        q.slot_free_at[idx] = SLOT_HELD;
        Some(SlotGrant {
            cell: q.slots[idx],
            available,
            idx,
        })
    }

    /// Advance `agv` out of `cur_idx`. From slot 0 the target is the
    /// processing cell, gated on `station_free_at`; otherwise the next
    /// slot toward the station, gated on that slot being vacated. The old
    /// slot frees `move_dur` seconds after the advance starts.
    pub fn advance_slot(
        &mut self,
        sid: &StationId,
        agv: AgvId,
        cur_idx: usize,
        now: Sec,
        move_dur: Sec,
    ) -> Option<Advance> {
        let q = self.queues.get_mut(sid)?;
        if q.occupants.get(cur_idx).copied().flatten() != Some(agv) {
            return None;
        }
        if cur_idx == 0 {
            let start = now.max(q.station_free_at);
            q.slot_free_at[0] = start + move_dur;
            q.occupants[0] = None;
            q.processing = Some(agv);
            return Some(Advance::ToStation {
                cell: q.station_pos,
                start,
            });
        }
        let next_idx = cur_idx - 1;
        let start = now.max(q.slot_free_at[next_idx]);
        q.occupants[next_idx] = Some(agv);
        q.slot_free_at[next_idx] = SLOT_HELD;
        q.occupants[cur_idx] = None;
        q.slot_free_at[cur_idx] = start + move_dur;
        Some(Advance::ToSlot {
            cell: q.slots[next_idx],
            start,
            idx: next_idx,
        })
    }

    /// Roll back a grant that was never driven to (loaded-blocked retry).
    pub fn free_slot(&mut self, sid: &StationId, agv: AgvId, idx: usize) {
        if let Some(q) = self.queues.get_mut(sid)
            && q.occupants.get(idx).copied().flatten() == Some(agv)
        {
            q.occupants[idx] = None;
            q.slot_free_at[idx] = 0;
        }
    }

    /// Record the processing cell becoming schedulable again.
    pub fn process_finished(&mut self, sid: &StationId, agv: AgvId, finish: Sec) {
        if let Some(q) = self.queues.get_mut(sid) {
            q.station_free_at = finish;
            if q.processing == Some(agv) {
                q.processing = None;
            }
        }
    }

    /// Clear the processing claim after the AGV physically departed.
    pub fn release_station(&mut self, sid: &StationId, agv: AgvId) {
        if let Some(q) = self.queues.get_mut(sid)
            && q.processing == Some(agv)
        {
            q.processing = None;
        }
    }
}
