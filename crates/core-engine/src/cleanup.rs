//! Pending shelf restorations left behind by shuffles.
//!
//! A shuffle parks a shelf on a buffer cell to clear a corridor; the debt
//! is recorded here and repaid by whichever AGV the dispatcher hands a
//! restore pass to. Nearest-first service keeps the repair traffic short.

use core_world::{Cell, ShelfId};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTask {
    pub buffer: Cell,
    pub original: Cell,
    pub shelf: ShelfId,
}

#[derive(Debug, Default)]
pub struct CleanupQueue {
    pending: VecDeque<CleanupTask>,
}

impl CleanupQueue {
    pub fn push(&mut self, task: CleanupTask) {
        self.pending.push_back(task);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Pop the pending restore whose buffer cell is closest to `pos`.
    pub fn take_nearest(&mut self, pos: Cell) -> Option<CleanupTask> {
        let best = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.buffer.manhattan(pos), t.buffer))?
            .0;
        self.pending.remove(best)
    }
}
