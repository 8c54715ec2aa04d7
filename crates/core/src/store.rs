//! Annotation store
//!
//! Canonical, insertion-ordered annotation set. Every successful mutation
//! pushes a full snapshot into the store's [`History`] and records the
//! pages it touched so cached projections can be invalidated.

use crate::annotation::{Annotation, AnnotationDraft, AnnotationId, AnnotationPatch, PageCoordinate};
use crate::config::EditorConfig;
use crate::error::{AnnotationError, AnnotationResult};
use crate::history::{History, Snapshot};
use crate::layers::LayerDirection;
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimum drag extent, in page units, for shape annotations
pub const DEFAULT_DRAG_THRESHOLD: f32 = 5.0;

/// Why a draft was dropped without touching the store
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Width or height below the drag threshold (an accidental click)
    BelowDragThreshold { width: f32, height: f32 },
}

/// Result of [`AnnotationStore::commit`]
///
/// Rejection is a silent no-op, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Annotation),
    Rejected(Rejection),
}

impl CommitOutcome {
    pub fn annotation(&self) -> Option<&Annotation> {
        match self {
            CommitOutcome::Committed(annotation) => Some(annotation),
            CommitOutcome::Rejected(_) => None,
        }
    }

    pub fn into_annotation(self) -> Option<Annotation> {
        match self {
            CommitOutcome::Committed(annotation) => Some(annotation),
            CommitOutcome::Rejected(_) => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// Lazy, restartable iterator over one page's annotations in insertion order
#[derive(Debug, Clone)]
pub struct PageAnnotations<'a> {
    inner: std::slice::Iter<'a, Annotation>,
    page: u32,
}

impl<'a> Iterator for PageAnnotations<'a> {
    type Item = &'a Annotation;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.page;
        self.inner.find(|annotation| annotation.page() == page)
    }
}

/// Owner of the annotation set and its undo history
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
    history: History,
    drag_threshold: f32,

    /// Pages touched since the last [`AnnotationStore::take_dirty_pages`]
    dirty_pages: BTreeSet<u32>,
}

impl AnnotationStore {
    /// Create an empty store with default settings
    pub fn new() -> Self {
        Self {
            annotations: Vec::new(),
            history: History::new(),
            drag_threshold: DEFAULT_DRAG_THRESHOLD,
            dirty_pages: BTreeSet::new(),
        }
    }

    /// Create an empty store using the threshold and history limit from `config`
    pub fn with_config(config: &EditorConfig) -> Self {
        let history = match config.history_limit {
            Some(limit) => History::with_limit(limit),
            None => History::new(),
        };

        Self {
            annotations: Vec::new(),
            history,
            drag_threshold: config.drag_threshold,
            dirty_pages: BTreeSet::new(),
        }
    }

    pub fn drag_threshold(&self) -> f32 {
        self.drag_threshold
    }

    /// Validate `draft`, assign an id and append it
    ///
    /// Shapes smaller than the drag threshold in either axis are rejected
    /// without touching the store or the history.
    pub fn commit(&mut self, draft: AnnotationDraft) -> AnnotationResult<CommitOutcome> {
        draft.validate()?;

        if let Some(size) = draft.geometry.size {
            if size.is_below(self.drag_threshold) {
                debug!(
                    kind = %draft.kind,
                    width = size.width,
                    height = size.height,
                    "draft below drag threshold, discarded"
                );
                return Ok(CommitOutcome::Rejected(Rejection::BelowDragThreshold {
                    width: size.width,
                    height: size.height,
                }));
            }
        }

        let annotation = Annotation::from_draft(draft, AnnotationId::new_v4(), Utc::now());
        debug!(
            id = %annotation.id(),
            kind = %annotation.kind(),
            page = annotation.page(),
            layer = annotation.layer(),
            "annotation committed"
        );

        self.dirty_pages.insert(annotation.page());
        self.annotations.push(annotation.clone());
        self.push_snapshot();

        Ok(CommitOutcome::Committed(annotation))
    }

    /// Merge `patch` into the annotation with `id`
    pub fn update(&mut self, id: AnnotationId, patch: &AnnotationPatch) -> AnnotationResult<Annotation> {
        let position = self.position(id)?;
        let current = &self.annotations[position];
        let updated = current.patched(patch)?;

        if let Some(size) = updated.geometry().size {
            if size.is_below(self.drag_threshold) {
                return Err(AnnotationError::InvalidDraft(format!(
                    "size {}x{} is below the minimum of {}",
                    size.width, size.height, self.drag_threshold
                )));
            }
        }

        self.dirty_pages.insert(current.page());
        self.dirty_pages.insert(updated.page());
        self.annotations[position] = updated.clone();
        self.push_snapshot();

        debug!(%id, "annotation updated");
        Ok(updated)
    }

    /// Remove the annotation with `id`
    pub fn delete(&mut self, id: AnnotationId) -> AnnotationResult<Annotation> {
        let position = self.position(id)?;
        let removed = self.annotations.remove(position);

        self.dirty_pages.insert(removed.page());
        self.push_snapshot();

        debug!(%id, "annotation deleted");
        Ok(removed)
    }

    /// Remove every annotation whose layer equals `key`, on every page
    ///
    /// A snapshot is pushed even when nothing matched, so every delete
    /// request is one undo step.
    pub fn delete_layer(&mut self, key: u32) -> Vec<Annotation> {
        let (removed, kept): (Vec<Annotation>, Vec<Annotation>) = std::mem::take(&mut self.annotations)
            .into_iter()
            .partition(|annotation| annotation.layer() == key);

        self.annotations = kept;
        self.dirty_pages.extend(removed.iter().map(Annotation::page));
        self.push_snapshot();

        debug!(layer = key, removed = removed.len(), "layer deleted");
        removed
    }

    /// Shift every annotation at `key` one layer up or down
    ///
    /// The target is clamped to `[0, max_layer]`, so moving the top layer up
    /// or layer 0 down changes nothing. Layers may merge; ties then fall back
    /// to insertion order. Returns the number of annotations moved; no
    /// snapshot is pushed when that is zero.
    pub fn move_layer(&mut self, key: u32, direction: LayerDirection) -> usize {
        let Some(max_layer) = self.max_layer() else {
            return 0;
        };

        let target = match direction {
            LayerDirection::Up => key.saturating_add(1).min(max_layer),
            LayerDirection::Down => key.saturating_sub(1),
        };
        if target == key {
            return 0;
        }

        let mut moved = 0;
        for annotation in self.annotations.iter_mut().filter(|a| a.layer() == key) {
            annotation.set_layer(target);
            self.dirty_pages.insert(annotation.page());
            moved += 1;
        }

        if moved > 0 {
            self.push_snapshot();
            debug!(from = key, to = target, moved, "layer moved");
        }
        moved
    }

    /// Annotations on `page` in insertion order
    pub fn query(&self, page: u32) -> PageAnnotations<'_> {
        PageAnnotations { inner: self.annotations.iter(), page }
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|annotation| annotation.id() == id)
    }

    /// Every annotation in insertion order
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Highest layer key in use across all pages
    pub fn max_layer(&self) -> Option<u32> {
        self.annotations.iter().map(Annotation::layer).max()
    }

    /// Pages holding at least one annotation
    pub fn pages(&self) -> BTreeSet<u32> {
        self.annotations.iter().map(Annotation::page).collect()
    }

    /// Annotations on `page` under `point`, topmost first
    pub fn hit_test(&self, page: u32, point: &PageCoordinate, tolerance: f32) -> Vec<&Annotation> {
        let mut hits: Vec<&Annotation> = self
            .query(page)
            .filter(|annotation| annotation.hit_test(point, tolerance))
            .collect();

        // Later insertion wins inside a layer, so reverse before the stable sort
        hits.reverse();
        hits.sort_by_key(|annotation| std::cmp::Reverse(annotation.layer()));
        hits
    }

    /// Restore the previous snapshot as the full annotation set
    pub fn undo(&mut self) -> AnnotationResult<()> {
        let snapshot = self.history.undo()?;
        self.install(&snapshot);
        debug!(index = ?self.history.index(), "undo");
        Ok(())
    }

    /// Re-apply the next snapshot as the full annotation set
    pub fn redo(&mut self) -> AnnotationResult<()> {
        let snapshot = self.history.redo()?;
        self.install(&snapshot);
        debug!(index = ?self.history.index(), "redo");
        Ok(())
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Current state as a shareable snapshot
    pub fn current_snapshot(&self) -> Snapshot {
        match self.history.current() {
            Some(snapshot) => Arc::clone(snapshot),
            None => Arc::from(self.annotations.as_slice()),
        }
    }

    /// Replace the whole set (e.g. after loading from disk)
    ///
    /// Invalid records and duplicate ids are skipped. History restarts with
    /// the loaded state as its only entry. Returns the number kept.
    pub fn replace_all(&mut self, annotations: Vec<Annotation>) -> usize {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(annotations.len());

        for annotation in annotations {
            if let Err(error) = annotation.validate() {
                warn!(id = %annotation.id(), %error, "skipping invalid annotation");
                continue;
            }
            if !seen.insert(annotation.id()) {
                warn!(id = %annotation.id(), "skipping duplicate annotation id");
                continue;
            }
            kept.push(annotation);
        }

        self.dirty_pages.extend(self.annotations.iter().map(Annotation::page));
        self.dirty_pages.extend(kept.iter().map(Annotation::page));
        self.annotations = kept;
        self.history.reset(Arc::from(self.annotations.as_slice()));
        self.annotations.len()
    }

    /// Drain the set of pages touched since the previous call
    pub fn take_dirty_pages(&mut self) -> BTreeSet<u32> {
        std::mem::take(&mut self.dirty_pages)
    }

    fn position(&self, id: AnnotationId) -> AnnotationResult<usize> {
        self.annotations
            .iter()
            .position(|annotation| annotation.id() == id)
            .ok_or(AnnotationError::NotFound(id))
    }

    fn push_snapshot(&mut self) {
        self.history.push(Arc::from(self.annotations.as_slice()));
    }

    fn install(&mut self, snapshot: &Snapshot) {
        self.dirty_pages.extend(self.annotations.iter().map(Annotation::page));
        self.dirty_pages.extend(snapshot.iter().map(Annotation::page));
        self.annotations = snapshot.to_vec();
    }
}

impl Default for AnnotationStore {
    fn default() -> Self {
        Self::new()
    }
}
