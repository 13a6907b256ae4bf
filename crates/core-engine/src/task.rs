//! Task records as the dispatcher consumes them.
//!
//! Preprocessing (out of scope here) has already consolidated raw order
//! lines into shelf-level tasks with per-wave station affinity; the engine
//! receives them fully formed. The retry fields (`skip_pickup`,
//! `assigned_agv`, `is_retry`) are engine-internal replay state: a task
//! whose carrier got blocked mid-delivery is re-queued *already loaded* and
//! bound to that carrier, so no other AGV can steal it while the shelf is
//! physically on its back.

use core_station::StationId;
use core_world::{AgvId, Cell, Sec, ShelfId};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One station visit. Processing time is precomputed per SKU group by the
/// preprocessor (base time plus a per-item term).
#[derive(Debug, Clone)]
pub struct Stop {
    pub station: StationId,
    pub processing_secs: Sec,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub shelf: ShelfId,
    pub wave_id: String,
    /// Seconds from the run epoch at which the task becomes dispatchable.
    pub release: Sec,
    pub stops: Vec<Stop>,
    pub items: u32,
    // Replay state, engine-internal.
    pub skip_pickup: bool,
    pub is_retry: bool,
    pub assigned_agv: Option<AgvId>,
    /// Cell the carried shelf was lifted from; fallback drop target when no
    /// smart spot can be found.
    pub carry_origin: Option<Cell>,
}

impl Task {
    /// The engine executes the first stop; multi-stop tasks are flattened
    /// by the preprocessor upstream.
    pub fn first_stop(&self) -> Option<&Stop> {
        self.stops.first()
    }

    pub fn is_inbound(&self) -> bool {
        self.wave_id.contains("RECEIVING")
    }
}

/// Synthetic head-of-queue task: free the named shelf so a blocked pickup
/// can proceed. Consumed by whichever AGV the dispatcher selects next.
#[derive(Debug, Clone)]
pub struct RescueTask {
    pub shelf: ShelfId,
}
