//! `SimInput` loading and validation.
//!
//! The input bundle is a single JSON document produced by the preprocessing
//! pipeline: per-floor grids, station and shelf placements, and the ordered
//! task queues, plus the run epoch. Structural problems (missing file,
//! corrupt grid, off-grid placements) are hard errors — the engine refuses
//! to run on stub data. A task referencing an unknown shelf is *not* a
//! structural problem; it is skipped at dispatch time.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read input bundle {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("input bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad datetime {value:?} (expected %Y-%m-%d %H:%M:%S)")]
    BadDatetime { value: String },
    #[error("floor {floor}: {reason}")]
    BadGrid { floor: String, reason: String },
    #[error("floor {floor}: station {station} at ({row},{col}) is not a workstation cell")]
    StationOffGrid {
        floor: String,
        station: String,
        row: u16,
        col: u16,
    },
    #[error("floor {floor}: shelf {shelf} at ({row},{col}) is not a storage cell")]
    ShelfOffGrid {
        floor: String,
        shelf: String,
        row: u16,
        col: u16,
    },
    #[error("floor {floor}: AGV spawn at ({row},{col}) is not passable")]
    SpawnOffGrid { floor: String, row: u16, col: u16 },
    #[error("floor {floor}: task {task} names unknown station {station}")]
    UnknownStation {
        floor: String,
        task: String,
        station: String,
    },
    #[error("input bundle has no floors")]
    NoFloors,
}

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Deserialize)]
pub struct SimInput {
    /// Run epoch; all emitted timestamps are `base_time + t` seconds.
    pub base_time: String,
    pub floors: Vec<FloorInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloorInput {
    /// Floor label, e.g. `"2F"`; becomes the `floor` column of the logs.
    pub name: String,
    /// Row-major matrix over {-1, 0, 1, 2}.
    pub grid: Vec<Vec<i8>>,
    pub stations: Vec<StationDef>,
    pub shelves: Vec<ShelfDef>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
    /// Explicit AGV spawn cells. When absent the engine seeds
    /// `dispatch.agvs_per_floor` vehicles onto free aisle cells itself.
    #[serde(default)]
    pub agvs: Option<Vec<SpawnDef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationDef {
    pub id: String,
    pub row: u16,
    pub col: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShelfDef {
    pub id: String,
    pub row: u16,
    pub col: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpawnDef {
    pub row: u16,
    pub col: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDef {
    pub task_id: String,
    pub shelf_id: String,
    pub wave_id: String,
    /// Release datetime, same format as `base_time`.
    pub datetime: String,
    pub stops: Vec<StopDef>,
    #[serde(default)]
    pub raw_items: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopDef {
    pub station: String,
    pub processing_time: i64,
}

impl SimInput {
    pub fn load(path: &Path) -> Result<SimInput, InputError> {
        let content = std::fs::read_to_string(path).map_err(|source| InputError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let input: SimInput = serde_json::from_str(&content)?;
        if input.floors.is_empty() {
            return Err(InputError::NoFloors);
        }
        Ok(input)
    }

    pub fn parse_base_time(&self) -> Result<NaiveDateTime, InputError> {
        parse_datetime(&self.base_time)
    }
}

pub fn parse_datetime(value: &str) -> Result<NaiveDateTime, InputError> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).map_err(|_| InputError::BadDatetime {
        value: value.to_string(),
    })
}
