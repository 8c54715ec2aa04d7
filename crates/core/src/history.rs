//! Snapshot-based undo/redo
//!
//! Every committed store mutation pushes a full copy of the annotation set.
//! The sequence is linear: pushing while the cursor is not at the end
//! discards the redo entries after the cursor.

use crate::annotation::Annotation;
use crate::error::{AnnotationError, AnnotationResult};
use std::sync::Arc;

/// Immutable full copy of the annotation set at one committed instant
pub type Snapshot = Arc<[Annotation]>;

/// Linear snapshot sequence with a single cursor
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<Snapshot>,

    /// Index of the current snapshot, `None` while empty
    cursor: Option<usize>,

    /// Maximum number of retained snapshots, oldest dropped first
    limit: Option<usize>,
}

impl History {
    /// Create an unbounded history
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history retaining at most `limit` snapshots (minimum 1)
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Append a snapshot, truncating any redo entries first
    pub fn push(&mut self, snapshot: Snapshot) {
        let keep = self.cursor.map_or(0, |cursor| cursor + 1);
        self.entries.truncate(keep);
        self.entries.push(snapshot);

        if let Some(limit) = self.limit {
            if self.entries.len() > limit {
                let excess = self.entries.len() - limit;
                self.entries.drain(..excess);
            }
        }

        self.cursor = Some(self.entries.len() - 1);
    }

    /// Step back one snapshot and return it
    ///
    /// The first snapshot is the floor: with the cursor at 0 there is
    /// nothing earlier to return.
    pub fn undo(&mut self) -> AnnotationResult<Snapshot> {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(cursor - 1);
                Ok(Arc::clone(&self.entries[cursor - 1]))
            }
            _ => Err(AnnotationError::NothingToUndo),
        }
    }

    /// Step forward one snapshot and return it
    pub fn redo(&mut self) -> AnnotationResult<Snapshot> {
        match self.cursor {
            Some(cursor) if cursor + 1 < self.entries.len() => {
                self.cursor = Some(cursor + 1);
                Ok(Arc::clone(&self.entries[cursor + 1]))
            }
            _ => Err(AnnotationError::NothingToRedo),
        }
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor + 1 < self.entries.len())
    }

    /// Cursor position, `None` when no snapshot has been pushed
    pub fn index(&self) -> Option<usize> {
        self.cursor
    }

    /// Snapshot under the cursor
    pub fn current(&self) -> Option<&Snapshot> {
        self.cursor.map(|cursor| &self.entries[cursor])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Drop every entry and start over from `snapshot`
    pub fn reset(&mut self, snapshot: Snapshot) {
        self.entries.clear();
        self.cursor = None;
        self.push(snapshot);
    }
}
