//! Static world model: grid classification, cell/direction primitives, the
//! dynamic shelf layer, and per-AGV state records.
//!
//! The grid is immutable after load; the set of storage (`1`) cells is fixed
//! for the whole run while the set of *shelves occupying* them changes as
//! AGVs carry shelves around. That split lives here as `Grid` (static) vs
//! `ShelfLayer` (dynamic). Everything downstream — the pathfinder, the
//! reservation tables, the dispatcher — speaks in the `Cell`/`Dir`/`Sec`
//! vocabulary defined in this crate.

use anyhow::{Result, bail};
use std::collections::{HashSet, VecDeque};
use std::fmt;

mod shelves;
pub use shelves::{ShelfId, ShelfLayer};

/// Simulation time in whole seconds from the run's base epoch. One grid step
/// takes exactly one second; all durations are integral.
pub type Sec = i64;

/// Grid coordinate. `row` grows downward, `col` to the right, matching the
/// map files. Event CSV output swaps the order (x = col, y = row); that
/// translation happens at the serialization boundary, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: u16,
    pub col: u16,
}

impl Cell {
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    pub fn manhattan(self, other: Cell) -> u32 {
        self.row.abs_diff(other.row) as u32 + self.col.abs_diff(other.col) as u32
    }

    /// Neighbor in `dir`, or `None` when the step would leave the
    /// non-negative quadrant. Upper bounds are the grid's business.
    pub fn step(self, dir: Dir) -> Option<Cell> {
        let (dr, dc) = dir.delta();
        let row = self.row.checked_add_signed(dr)?;
        let col = self.col.checked_add_signed(dc)?;
        Some(Cell { row, col })
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Movement direction. Indices 0..=4 are stable (E, S, W, N, Wait) — the
/// pathfinder keys search states on them and a 180° reversal is exactly
/// "index differs by 2" among the four cardinal entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dir {
    East,
    South,
    West,
    North,
    Wait,
}

impl Dir {
    pub const CARDINAL: [Dir; 4] = [Dir::East, Dir::South, Dir::West, Dir::North];
    /// All successor moves in expansion order, `Wait` last.
    pub const ALL: [Dir; 5] = [Dir::East, Dir::South, Dir::West, Dir::North, Dir::Wait];

    pub const fn index(self) -> u8 {
        match self {
            Dir::East => 0,
            Dir::South => 1,
            Dir::West => 2,
            Dir::North => 3,
            Dir::Wait => 4,
        }
    }

    pub const fn delta(self) -> (i16, i16) {
        match self {
            Dir::East => (0, 1),
            Dir::South => (1, 0),
            Dir::West => (0, -1),
            Dir::North => (-1, 0),
            Dir::Wait => (0, 0),
        }
    }

    /// True when `other` is the exact opposite cardinal direction.
    pub fn is_reversal_of(self, other: Dir) -> bool {
        self != Dir::Wait && other != Dir::Wait && self.index().abs_diff(other.index()) == 2
    }
}

/// Classification of one grid cell, decoded from the map matrix values
/// `{-1, 0, 1, 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Wall,
    Aisle,
    Storage,
    Station,
}

impl CellKind {
    pub fn from_raw(v: i8) -> Option<CellKind> {
        match v {
            -1 => Some(CellKind::Wall),
            0 => Some(CellKind::Aisle),
            1 => Some(CellKind::Storage),
            2 => Some(CellKind::Station),
            _ => None,
        }
    }
}

/// Hard ceiling on map dimensions; anything larger is a corrupt input.
pub const MAX_ROWS: usize = 32;
pub const MAX_COLS: usize = 61;

/// Immutable per-floor cell classification. Row-major storage, linearized
/// index `row * cols + col`.
#[derive(Debug, Clone)]
pub struct Grid {
    rows: u16,
    cols: u16,
    cells: Vec<CellKind>,
}

impl Grid {
    /// Build from the raw map matrix. Rejects empty, ragged, oversized, or
    /// out-of-alphabet input — the engine refuses to run on stub data.
    pub fn from_rows(raw: &[Vec<i8>]) -> Result<Grid> {
        if raw.is_empty() || raw[0].is_empty() {
            bail!("grid is empty");
        }
        if raw.len() > MAX_ROWS || raw[0].len() > MAX_COLS {
            bail!(
                "grid {}x{} exceeds the {}x{} limit",
                raw.len(),
                raw[0].len(),
                MAX_ROWS,
                MAX_COLS
            );
        }
        let cols = raw[0].len();
        let mut cells = Vec::with_capacity(raw.len() * cols);
        for (r, row) in raw.iter().enumerate() {
            if row.len() != cols {
                bail!("grid row {r} has {} cells, expected {cols}", row.len());
            }
            for (c, &v) in row.iter().enumerate() {
                match CellKind::from_raw(v) {
                    Some(kind) => cells.push(kind),
                    None => bail!("grid value {v} at ({r},{c}) is not in {{-1,0,1,2}}"),
                }
            }
        }
        Ok(Grid {
            rows: raw.len() as u16,
            cols: cols as u16,
            cells,
        })
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    pub fn kind(&self, cell: Cell) -> CellKind {
        debug_assert!(self.in_bounds(cell));
        self.cells[cell.row as usize * self.cols as usize + cell.col as usize]
    }

    pub fn is_passable(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.kind(cell) != CellKind::Wall
    }

    pub fn is_storage(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.kind(cell) == CellKind::Storage
    }

    pub fn is_station(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.kind(cell) == CellKind::Station
    }

    /// In-bounds, non-wall 4-neighbors.
    pub fn passable_neighbors(&self, cell: Cell) -> impl Iterator<Item = Cell> + '_ {
        Dir::CARDINAL
            .into_iter()
            .filter_map(move |d| cell.step(d))
            .filter(|&c| self.is_passable(c))
    }

    /// Storage cells in row-major order. The order is part of the engine's
    /// determinism contract (sampling indexes into this list).
    pub fn storage_cells(&self) -> Vec<Cell> {
        let mut out = Vec::new();
        for r in 0..self.rows {
            for c in 0..self.cols {
                let cell = Cell::new(r, c);
                if self.kind(cell) == CellKind::Storage {
                    out.push(cell);
                }
            }
        }
        out
    }

    /// BFS reachability over non-wall cells. Used as a precondition before
    /// pathfinding: a disconnected pair can never succeed, so the caller
    /// teleports instead of burning an A* budget.
    pub fn connected(&self, a: Cell, b: Cell) -> bool {
        if !self.is_passable(a) || !self.is_passable(b) {
            return false;
        }
        if a == b {
            return true;
        }
        let mut visited = HashSet::from([a]);
        let mut queue = VecDeque::from([a]);
        while let Some(cur) = queue.pop_front() {
            for next in self.passable_neighbors(cur) {
                if next == b {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }
}

/// AGV identifier; rendered as `AGV_<n>` in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgvId(pub u32);

impl fmt::Display for AgvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AGV_{}", self.0)
    }
}

/// Mutable per-vehicle state. `free_at` is the earliest second the AGV can
/// accept new work; the dispatcher always advances it, never rewinds.
#[derive(Debug, Clone)]
pub struct Agv {
    pub id: AgvId,
    pub pos: Cell,
    pub dir: Dir,
    pub free_at: Sec,
}

impl Agv {
    pub fn new(id: AgvId, pos: Cell) -> Self {
        Self {
            id,
            pos,
            dir: Dir::Wait,
            free_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_grid(rows: usize, cols: usize) -> Grid {
        Grid::from_rows(&vec![vec![0i8; cols]; rows]).unwrap()
    }

    #[test]
    fn reversal_pairs() {
        assert!(Dir::East.is_reversal_of(Dir::West));
        assert!(Dir::North.is_reversal_of(Dir::South));
        assert!(!Dir::East.is_reversal_of(Dir::South));
        assert!(!Dir::Wait.is_reversal_of(Dir::Wait));
    }

    #[test]
    fn step_clamps_at_origin() {
        assert_eq!(Cell::new(0, 0).step(Dir::North), None);
        assert_eq!(Cell::new(0, 0).step(Dir::West), None);
        assert_eq!(Cell::new(0, 0).step(Dir::South), Some(Cell::new(1, 0)));
    }

    #[test]
    fn rejects_ragged_and_oversized() {
        assert!(Grid::from_rows(&[vec![0, 0], vec![0]]).is_err());
        assert!(Grid::from_rows(&vec![vec![0i8; MAX_COLS + 1]; 2]).is_err());
        assert!(Grid::from_rows(&[vec![0, 7]]).is_err());
    }

    #[test]
    fn connectivity_respects_walls() {
        // 3x3 with a full wall column down the middle.
        let g = Grid::from_rows(&[vec![0, -1, 0], vec![0, -1, 0], vec![0, -1, 0]]).unwrap();
        assert!(!g.connected(Cell::new(0, 0), Cell::new(0, 2)));
        assert!(g.connected(Cell::new(0, 0), Cell::new(2, 0)));
    }

    #[test]
    fn connectivity_trivial_cases() {
        let g = open_grid(2, 2);
        assert!(g.connected(Cell::new(0, 0), Cell::new(0, 0)));
        assert!(g.connected(Cell::new(0, 0), Cell::new(1, 1)));
    }

    #[test]
    fn storage_cells_row_major() {
        let g = Grid::from_rows(&[vec![1, 0], vec![0, 1]]).unwrap();
        assert_eq!(g.storage_cells(), vec![Cell::new(0, 0), Cell::new(1, 1)]);
    }
}
