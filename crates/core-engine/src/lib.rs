//! The physical execution engine.
//!
//! A discrete, single-threaded, per-floor sequential simulator. Each floor
//! owns its entire mutable world — grid, reservation table, shelf layer,
//! AGV pool, station managers, task queues — as one `FloorState` shard, and
//! floors are simulated to completion one after another with no shared
//! state between them. `SimulationEngine` owns the shards plus everything
//! cross-floor (clock, config, seeded RNG, output sink, monitor) and hands
//! a `FloorCtx` of explicit `&mut` borrows to the dispatcher; there are no
//! cycles in ownership and no interior mutability anywhere.
//!
//! Determinism is a feature, not an accident: a single seeded RNG, ordered
//! maps for every iteration that feeds a decision, and integer-only cost
//! arithmetic make rerunning the same input bundle bit-identical.

pub mod input;

mod cleanup;
mod dispatch;
mod monitor;
mod mover;
mod shuffle;
mod storage;
mod task;
mod traffic;

pub use cleanup::{CleanupQueue, CleanupTask};
pub use input::{InputError, SimInput};
pub use monitor::LiveMonitor;
pub use mover::{BlockedPolicy, Drive, PathBlocked, TeleReason};
pub use task::{RescueTask, Stop, Task, TaskId};

use anyhow::Result;
use core_config::SimConfig;
use core_events::{EventKind, EventRecord, ObjectId, OutputSink, SimClock};
use core_path::PathCosts;
use core_reserve::ReservationTable;
use core_station::{PhysicalQueueManager, StationId, ZoneManager};
use core_world::{Agv, AgvId, Cell, CellKind, Grid, Sec, ShelfId, ShelfLayer};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{info, warn};

/// Everything mutable about one floor. A shard is only ever touched by the
/// floor loop that owns it.
pub struct FloorState {
    pub name: String,
    pub grid: Grid,
    pub reservations: ReservationTable,
    pub shelves: ShelfLayer,
    pub agvs: Vec<Agv>,
    pub stations: BTreeMap<StationId, Cell>,
    pub pqm: PhysicalQueueManager,
    pub zm: ZoneManager,
    /// Row-major storage cells, fixed for the run; sampling indexes here.
    pub storage_cells: Vec<Cell>,
    pub station_tasks: BTreeMap<StationId, VecDeque<Task>>,
    pub rescue_queue: VecDeque<RescueTask>,
    pub rescue_locks: HashSet<ShelfId>,
    pub cleanup: CleanupQueue,
    pub retry_counter: HashMap<TaskId, u32>,
    /// Tasks completed on this floor (heartbeat / cleanup cadence).
    pub done: usize,
}

impl FloorState {
    pub fn has_work(&self) -> bool {
        !self.rescue_queue.is_empty()
            || !self.cleanup.is_empty()
            || self.station_tasks.values().any(|q| !q.is_empty())
    }

    pub fn queued_tasks(&self) -> usize {
        self.station_tasks.values().map(|q| q.len()).sum::<usize>()
            + self.rescue_queue.len()
            + self.cleanup.len()
    }

    /// Minimum clock across the fleet; retention cleanup keys off this so
    /// no AGV can have its future swept out from under it.
    pub fn fleet_min_time(&self) -> Sec {
        self.agvs.iter().map(|a| a.free_at).min().unwrap_or(0)
    }

    /// Cells under every AGV except `me`. Standing vehicles are invisible
    /// to the reservation table, so the mover feeds these to the
    /// pathfinder as hard obstacles.
    pub fn standing_blockers(&self, me: AgvId) -> HashSet<Cell> {
        self.agvs
            .iter()
            .filter(|a| a.id != me)
            .map(|a| a.pos)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed_tasks: u64,
    pub force_teleports: u64,
}

fn costs_from(cfg: &core_config::PathConfig) -> PathCosts {
    PathCosts {
        heuristic_weight: cfg.heuristic_weight,
        turn: cfg.turn_cost,
        u_turn: cfg.u_turn_cost,
        wait: cfg.wait_cost,
        tunnel: cfg.tunnel_cost,
        shelf_pass: cfg.shelf_pass_cost,
        expansion_floor: cfg.expansion_floor,
        expansion_per_cell: cfg.expansion_per_cell,
        dynamic_horizon: cfg.dynamic_horizon_secs,
    }
}

pub struct SimulationEngine<S> {
    cfg: SimConfig,
    costs: PathCosts,
    clock: SimClock,
    floors: Vec<FloorState>,
    wave_totals: HashMap<String, usize>,
    rng: SmallRng,
    monitor: LiveMonitor,
    sink: S,
}

impl<S: OutputSink> SimulationEngine<S> {
    pub fn new(input: &SimInput, cfg: SimConfig, sink: S) -> Result<Self, InputError> {
        let base = input.parse_base_time()?;
        let clock = SimClock::new(base);
        let costs = costs_from(&cfg.path);
        let mut rng = SmallRng::seed_from_u64(cfg.engine.seed);

        let mut wave_totals: HashMap<String, usize> = HashMap::new();
        for floor in &input.floors {
            for t in &floor.tasks {
                *wave_totals.entry(t.wave_id.clone()).or_default() += 1;
            }
        }

        let mut floors = Vec::with_capacity(input.floors.len());
        for (idx, f) in input.floors.iter().enumerate() {
            floors.push(build_floor(idx, f, &clock, &cfg, &mut rng)?);
        }

        Ok(Self {
            monitor: LiveMonitor::new(cfg.engine.teleport_warn_threshold),
            cfg,
            costs,
            clock,
            floors,
            wave_totals,
            rng,
            sink,
        })
    }

    /// Simulate every floor to completion, in bundle order.
    pub fn run(&mut self) -> Result<RunSummary> {
        for idx in 0..self.floors.len() {
            info!(
                target: "engine",
                floor = %self.floors[idx].name,
                tasks = self.floors[idx].queued_tasks(),
                agvs = self.floors[idx].agvs.len(),
                "floor loop start"
            );
            self.run_floor(idx)?;
        }
        let summary = RunSummary {
            completed_tasks: self.monitor.completed(),
            force_teleports: self.monitor.teleport_total(),
        };
        self.monitor.final_report();
        Ok(summary)
    }

    fn run_floor(&mut self, idx: usize) -> Result<()> {
        let SimulationEngine {
            cfg,
            costs,
            clock,
            floors,
            wave_totals,
            rng,
            monitor,
            sink,
        } = self;
        let sink: &mut dyn OutputSink = sink;
        let mut ctx = FloorCtx {
            floor: &mut floors[idx],
            sink,
            clock: *clock,
            cfg,
            costs,
            monitor,
            rng,
            wave_totals,
        };
        ctx.bootstrap()?;
        ctx.dispatch_loop()
    }

    pub fn monitor(&self) -> &LiveMonitor {
        &self.monitor
    }

    pub fn floors(&self) -> &[FloorState] {
        &self.floors
    }

    /// Hand the sink back (tests read the in-memory one after a run).
    pub fn into_sink(self) -> S {
        self.sink
    }
}

fn build_floor(
    index: usize,
    f: &input::FloorInput,
    clock: &SimClock,
    cfg: &SimConfig,
    rng: &mut SmallRng,
) -> Result<FloorState, InputError> {
    let grid = Grid::from_rows(&f.grid).map_err(|e| InputError::BadGrid {
        floor: f.name.clone(),
        reason: e.to_string(),
    })?;

    let mut stations = BTreeMap::new();
    for s in &f.stations {
        let cell = Cell::new(s.row, s.col);
        if !grid.is_station(cell) {
            return Err(InputError::StationOffGrid {
                floor: f.name.clone(),
                station: s.id.clone(),
                row: s.row,
                col: s.col,
            });
        }
        stations.insert(StationId(s.id.clone()), cell);
    }

    let mut shelves = ShelfLayer::new();
    for sh in &f.shelves {
        let cell = Cell::new(sh.row, sh.col);
        if !grid.is_storage(cell) {
            return Err(InputError::ShelfOffGrid {
                floor: f.name.clone(),
                shelf: sh.id.clone(),
                row: sh.row,
                col: sh.col,
            });
        }
        if !shelves.set_down(ShelfId(sh.id.clone()), cell) {
            return Err(InputError::BadGrid {
                floor: f.name.clone(),
                reason: format!("duplicate shelf placement at ({},{})", sh.row, sh.col),
            });
        }
    }

    let mut station_tasks: BTreeMap<StationId, VecDeque<Task>> = BTreeMap::new();
    for t in &f.tasks {
        let release_dt = input::parse_datetime(&t.datetime)?;
        let release = (release_dt - clock.base()).num_seconds().max(0);
        let stops = t
            .stops
            .iter()
            .map(|s| {
                let sid = StationId(s.station.clone());
                if !stations.contains_key(&sid) {
                    return Err(InputError::UnknownStation {
                        floor: f.name.clone(),
                        task: t.task_id.clone(),
                        station: s.station.clone(),
                    });
                }
                Ok(Stop {
                    station: sid,
                    processing_secs: s.processing_time,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let Some(first) = stops.first() else {
            warn!(target: "engine", task = %t.task_id, "task has no stops, dropped");
            continue;
        };
        let station = first.station.clone();
        station_tasks.entry(station).or_default().push_back(Task {
            id: TaskId(t.task_id.clone()),
            shelf: ShelfId(t.shelf_id.clone()),
            wave_id: t.wave_id.clone(),
            release,
            stops,
            items: t.raw_items,
            skip_pickup: false,
            is_retry: false,
            assigned_agv: None,
            carry_origin: None,
        });
    }

    let agvs = seed_agvs(index, f, &grid, &shelves, cfg, rng)?;

    let pqm = PhysicalQueueManager::new(&stations);
    let zm = ZoneManager::new(stations.keys(), cfg.dispatch.zone_capacity);
    let storage_cells = grid.storage_cells();

    Ok(FloorState {
        name: f.name.clone(),
        reservations: ReservationTable::new(cfg.reserve.retention_secs),
        grid,
        shelves,
        agvs,
        stations,
        pqm,
        zm,
        storage_cells,
        station_tasks,
        rescue_queue: VecDeque::new(),
        rescue_locks: HashSet::new(),
        cleanup: CleanupQueue::default(),
        retry_counter: HashMap::new(),
        done: 0,
    })
}

fn seed_agvs(
    floor_index: usize,
    f: &input::FloorInput,
    grid: &Grid,
    shelves: &ShelfLayer,
    cfg: &SimConfig,
    rng: &mut SmallRng,
) -> Result<Vec<Agv>, InputError> {
    let id_base = floor_index as u32 * 100;
    if let Some(spawns) = &f.agvs {
        let mut agvs = Vec::with_capacity(spawns.len());
        for (i, s) in spawns.iter().enumerate() {
            let cell = Cell::new(s.row, s.col);
            if !grid.is_passable(cell) || shelves.occupies(cell) {
                return Err(InputError::SpawnOffGrid {
                    floor: f.name.clone(),
                    row: s.row,
                    col: s.col,
                });
            }
            agvs.push(Agv::new(AgvId(id_base + i as u32 + 1), cell));
        }
        return Ok(agvs);
    }

    // Self-seeding: free aisle cells first, free storage cells as overflow,
    // shuffled by the run RNG so placement is seed-stable.
    let mut candidates: Vec<Cell> = Vec::new();
    for r in 0..grid.rows() {
        for c in 0..grid.cols() {
            let cell = Cell::new(r, c);
            match grid.kind(cell) {
                CellKind::Aisle => candidates.push(cell),
                CellKind::Storage if !shelves.occupies(cell) => candidates.push(cell),
                _ => {}
            }
        }
    }
    candidates.shuffle(rng);
    // Aisle spots sort ahead of storage overflow after the shuffle.
    candidates.sort_by_key(|&c| grid.kind(c) != CellKind::Aisle);
    let n = cfg.dispatch.agvs_per_floor.min(candidates.len());
    if n < cfg.dispatch.agvs_per_floor {
        warn!(
            target: "engine",
            floor = %f.name,
            wanted = cfg.dispatch.agvs_per_floor,
            seeded = n,
            "not enough free cells for the requested fleet"
        );
    }
    Ok(candidates[..n]
        .iter()
        .enumerate()
        .map(|(i, &cell)| Agv::new(AgvId(id_base + i as u32 + 1), cell))
        .collect())
}

/// Per-floor working set: one shard plus every cross-floor resource the
/// dispatcher, mover, and rescue machinery need, as plain `&mut` borrows.
pub(crate) struct FloorCtx<'a> {
    pub floor: &'a mut FloorState,
    pub sink: &'a mut dyn OutputSink,
    pub clock: SimClock,
    pub cfg: &'a SimConfig,
    pub costs: &'a PathCosts,
    pub monitor: &'a mut LiveMonitor,
    pub rng: &'a mut SmallRng,
    pub wave_totals: &'a HashMap<String, usize>,
}

impl FloorCtx<'_> {
    pub(crate) fn emit_agv(
        &mut self,
        id: AgvId,
        kind: EventKind,
        t0: Sec,
        t1: Sec,
        from: Cell,
        to: Cell,
        text: impl Into<String>,
    ) -> Result<()> {
        self.sink.emit_event(EventRecord {
            start: self.clock.at(t0),
            end: self.clock.at(t1),
            floor: self.floor.name.clone(),
            obj: ObjectId::Agv(id),
            from,
            to,
            kind,
            text: text.into(),
        })
    }

    pub(crate) fn emit_ws(
        &mut self,
        sid: &StationId,
        kind: EventKind,
        t0: Sec,
        t1: Sec,
        at: Cell,
        text: impl Into<String>,
    ) -> Result<()> {
        self.sink.emit_event(EventRecord {
            start: self.clock.at(t0),
            end: self.clock.at(t1),
            floor: self.floor.name.clone(),
            obj: ObjectId::Workstation(sid.clone()),
            from: at,
            to: at,
            kind,
            text: text.into(),
        })
    }
}
