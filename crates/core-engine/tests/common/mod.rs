#![allow(dead_code)] // Shared across test binaries; each uses a subset of helpers.

//! Shared harness for engine scenario tests: input builders, a memory-sink
//! runner, and event-log audits.

use chrono::NaiveDateTime;
use core_config::SimConfig;
use core_engine::input::{FloorInput, ShelfDef, SpawnDef, StationDef, StopDef, TaskDef};
use core_engine::{RunSummary, SimInput, SimulationEngine};
use core_events::{EventKind, EventRecord, KpiRecord, MemorySink};
use core_world::{Cell, Sec};
use std::collections::HashMap;

pub const BASE: &str = "2024-03-01 08:00:00";

pub fn base_dt() -> NaiveDateTime {
    NaiveDateTime::parse_from_str(BASE, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub fn station(id: &str, row: u16, col: u16) -> StationDef {
    StationDef {
        id: id.to_string(),
        row,
        col,
    }
}

pub fn shelf(id: &str, row: u16, col: u16) -> ShelfDef {
    ShelfDef {
        id: id.to_string(),
        row,
        col,
    }
}

pub fn spawn(row: u16, col: u16) -> SpawnDef {
    SpawnDef { row, col }
}

pub fn task(
    task_id: &str,
    shelf_id: &str,
    wave_id: &str,
    release_offset: Sec,
    station: &str,
    processing: i64,
) -> TaskDef {
    let dt = base_dt() + chrono::Duration::seconds(release_offset);
    TaskDef {
        task_id: task_id.to_string(),
        shelf_id: shelf_id.to_string(),
        wave_id: wave_id.to_string(),
        datetime: dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        stops: vec![StopDef {
            station: station.to_string(),
            processing_time: processing,
        }],
        raw_items: 1,
    }
}

pub fn floor(
    name: &str,
    grid: Vec<Vec<i8>>,
    stations: Vec<StationDef>,
    shelves: Vec<ShelfDef>,
    agvs: Vec<SpawnDef>,
    tasks: Vec<TaskDef>,
) -> FloorInput {
    FloorInput {
        name: name.to_string(),
        grid,
        stations,
        shelves,
        tasks,
        agvs: Some(agvs),
    }
}

pub fn input(floors: Vec<FloorInput>) -> SimInput {
    SimInput {
        base_time: BASE.to_string(),
        floors,
    }
}

pub struct Outcome {
    pub events: Vec<EventRecord>,
    pub kpis: Vec<KpiRecord>,
    pub summary: RunSummary,
    /// Final `(cell, on_storage_cell)` for every placed shelf, all floors.
    pub final_shelves: Vec<(Cell, bool)>,
}

pub fn run(input: &SimInput, cfg: SimConfig) -> Outcome {
    let mut engine = SimulationEngine::new(input, cfg, MemorySink::default()).expect("valid input");
    let summary = engine.run().expect("run completes");
    assert_eq!(
        engine.monitor().teleport_total(),
        summary.force_teleports,
        "monitor and summary disagree on teleports"
    );
    let final_shelves = engine
        .floors()
        .iter()
        .flat_map(|f| {
            f.shelves
                .iter_sorted()
                .into_iter()
                .map(|(_, cell)| (cell, f.grid.is_storage(cell)))
                .collect::<Vec<_>>()
        })
        .collect();
    let sink = engine.into_sink();
    Outcome {
        events: sink.events,
        kpis: sink.kpis,
        summary,
        final_shelves,
    }
}

/// Seconds offset of a record's start from the run epoch.
pub fn start_sec(rec: &EventRecord) -> Sec {
    (rec.start - base_dt()).num_seconds()
}

pub fn end_sec(rec: &EventRecord) -> Sec {
    (rec.end - base_dt()).num_seconds()
}

pub fn of_kind<'a>(events: &'a [EventRecord], kind: EventKind) -> Vec<&'a EventRecord> {
    events.iter().filter(|e| e.kind == kind).collect()
}

/// Audit: no two vehicles land on the same cell at the same second, and no
/// opposing traversals of one edge share a time slot.
pub fn assert_no_move_conflicts(events: &[EventRecord]) {
    let moves: Vec<&EventRecord> = events
        .iter()
        .filter(|e| e.kind == EventKind::AgvMove && e.from != e.to)
        .collect();
    let mut landings: HashMap<(Cell, Sec), &EventRecord> = HashMap::new();
    for m in &moves {
        if let Some(prev) = landings.insert((m.to, end_sec(m)), m) {
            assert_eq!(
                prev.obj, m.obj,
                "two vehicles land on {:?} at t={}: {:?} and {:?}",
                m.to,
                end_sec(m),
                prev,
                m
            );
        }
    }
    let mut edges: HashMap<(Cell, Cell, Sec), &EventRecord> = HashMap::new();
    for m in &moves {
        edges.insert((m.from, m.to, start_sec(m)), m);
    }
    for m in &moves {
        if let Some(op) = edges.get(&(m.to, m.from, start_sec(m))) {
            assert_eq!(
                op.obj, m.obj,
                "swap conflict on {:?}<->{:?} at t={}",
                m.from,
                m.to,
                start_sec(m)
            );
        }
    }
}

/// Audit: every SHUFFLE_LOAD is eventually balanced by a SHUFFLE_UNLOAD (in
/// production order) and the totals match.
pub fn assert_shuffles_paired(events: &[EventRecord]) {
    let mut balance: i64 = 0;
    for e in events {
        match e.kind {
            EventKind::ShuffleLoad => balance += 1,
            EventKind::ShuffleUnload => {
                balance -= 1;
                assert!(balance >= 0, "SHUFFLE_UNLOAD without a prior load: {e:?}");
            }
            _ => {}
        }
    }
    assert_eq!(balance, 0, "unbalanced shuffle pairs");
}

/// Audit: shelf pickups and set-downs balance.
pub fn assert_shelf_conservation(events: &[EventRecord], expected_shelves: usize, out: &Outcome) {
    let loads = of_kind(events, EventKind::ShelfLoad).len();
    let unloads = of_kind(events, EventKind::ShelfUnload).len();
    assert_eq!(loads, unloads, "SHELF_LOAD/SHELF_UNLOAD imbalance");
    assert_eq!(
        out.final_shelves.len(),
        expected_shelves,
        "shelf population changed across the run"
    );
}
