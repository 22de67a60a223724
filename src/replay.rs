//! Step-through navigation over a finished [`Trajectory`].
//!
//! The engine never pauses mid-run; stepping is an index into snapshots
//! that already exist.

use crate::{KMeansError, Result, Snapshot, Trajectory};

#[derive(Debug, Clone)]
pub struct ReplayCursor<'t> {
    trajectory: &'t Trajectory,
    position: usize,
}

impl<'t> ReplayCursor<'t> {
    /// Cursor positioned on the first snapshot.
    pub fn new(trajectory: &'t Trajectory) -> Self {
        Self {
            trajectory,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectory.is_empty()
    }

    pub fn current(&self) -> &'t Snapshot {
        &self.trajectory.snapshots()[self.position]
    }

    /// True once the cursor rests on the closing snapshot.
    pub fn is_finished(&self) -> bool {
        self.position + 1 >= self.trajectory.len()
    }

    /// Advance one step; `None` when already on the last snapshot.
    pub fn next_step(&mut self) -> Option<&'t Snapshot> {
        if self.is_finished() {
            return None;
        }
        self.position += 1;
        Some(self.current())
    }

    pub fn previous_step(&mut self) -> Option<&'t Snapshot> {
        if self.position == 0 {
            return None;
        }
        self.position -= 1;
        Some(self.current())
    }

    pub fn seek(&mut self, step: usize) -> Result<&'t Snapshot> {
        if step >= self.trajectory.len() {
            return Err(KMeansError::StepOutOfRange {
                step,
                len: self.trajectory.len(),
            });
        }
        self.position = step;
        Ok(self.current())
    }

    /// Jump to the closing snapshot.
    pub fn run_to_convergence(&mut self) -> &'t Snapshot {
        self.position = self.trajectory.len().saturating_sub(1);
        self.current()
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}
