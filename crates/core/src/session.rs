//! Editor session
//!
//! The single owned context for one open document: the annotation store and
//! its history, layer visibility, raster decodes, cached frames and the
//! transport outbox. Callers drive it from one thread; the only background
//! work is raster decoding, collected with [`EditorSession::poll_decodes`].

use crate::annotation::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationPatch, PageCoordinate, Payload, RasterPayload,
};
use crate::config::EditorConfig;
use crate::decode::RasterCache;
use crate::document::{DocumentSource, PageSize};
use crate::error::{AnnotationError, AnnotationResult};
use crate::layers::{LayerDirection, LayerEntry, LayerIndex};
use crate::projection::{DrawPrimitive, Projector, Rect};
use crate::signature::SignatureLibrary;
use crate::store::{AnnotationStore, CommitOutcome, PageAnnotations};
use crate::transport::{diff_snapshots, AnnotationTransport, FlushReport, Outbox, TransportError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything needed to paint one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub page: u32,
    pub zoom: f32,

    /// Page backdrop in device units
    pub backdrop: Rect,

    pub primitives: Vec<DrawPrimitive>,

    /// Raster annotations still waiting on a decode
    pub deferred: Vec<AnnotationId>,
}

pub struct EditorSession {
    config: EditorConfig,
    store: AnnotationStore,
    layers: LayerIndex,
    projector: Projector,
    rasters: RasterCache,
    /// Latest frame per page, keyed by page and zoom bits
    frames: HashMap<(u32, u32), Arc<Frame>>,
    document: Box<dyn DocumentSource>,
    signatures: SignatureLibrary,
    transport: Option<Box<dyn AnnotationTransport>>,
    outbox: Outbox,
}

impl EditorSession {
    pub fn new(document: impl DocumentSource + 'static) -> Self {
        Self::with_config(EditorConfig::default(), document)
    }

    pub fn with_config(config: EditorConfig, document: impl DocumentSource + 'static) -> Self {
        Self {
            store: AnnotationStore::with_config(&config),
            layers: LayerIndex::new(),
            projector: Projector::from_config(&config),
            rasters: RasterCache::new(),
            frames: HashMap::new(),
            document: Box::new(document),
            signatures: SignatureLibrary::new(),
            transport: None,
            outbox: Outbox::new(),
            config,
        }
    }

    /// Forward every committed change to `transport` from now on
    pub fn with_transport(mut self, transport: impl AnnotationTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn with_raster_cache(mut self, rasters: RasterCache) -> Self {
        self.rasters = rasters;
        self
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn page_count(&self) -> u32 {
        self.document.page_count()
    }

    pub fn page_size(&self, page: u32) -> Option<PageSize> {
        self.document.page_size(page)
    }

    pub fn signatures(&self) -> &SignatureLibrary {
        &self.signatures
    }

    pub fn signatures_mut(&mut self) -> &mut SignatureLibrary {
        &mut self.signatures
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Commit a draft; the page must exist in the document
    pub fn commit(&mut self, draft: AnnotationDraft) -> AnnotationResult<CommitOutcome> {
        self.check_page(draft.page)?;
        self.mutate(|store| store.commit(draft))
    }

    pub fn update(&mut self, id: AnnotationId, patch: &AnnotationPatch) -> AnnotationResult<Annotation> {
        if let Some(page) = patch.page {
            self.check_page(page)?;
        }
        self.mutate(|store| store.update(id, patch))
    }

    pub fn delete(&mut self, id: AnnotationId) -> AnnotationResult<Annotation> {
        self.mutate(|store| store.delete(id))
    }

    pub fn delete_layer(&mut self, key: u32) -> Vec<Annotation> {
        self.mutate(|store| store.delete_layer(key))
    }

    pub fn move_layer(&mut self, key: u32, direction: LayerDirection) -> usize {
        self.mutate(|store| store.move_layer(key, direction))
    }

    pub fn undo(&mut self) -> AnnotationResult<()> {
        self.mutate(AnnotationStore::undo)
    }

    pub fn redo(&mut self) -> AnnotationResult<()> {
        self.mutate(AnnotationStore::redo)
    }

    pub fn can_undo(&self) -> bool {
        self.store.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.store.can_redo()
    }

    /// Show or hide a layer key on every page
    pub fn set_layer_visible(&mut self, key: u32, visible: bool) {
        if self.layers.set_visible(key, visible) {
            self.frames.clear();
        }
    }

    pub fn is_layer_visible(&self, key: u32) -> bool {
        self.layers.is_visible(key)
    }

    pub fn layers_for(&self, page: u32) -> Vec<LayerEntry> {
        self.layers.layers_for(&self.store, page)
    }

    /// Layers of `page`, highest first
    pub fn layer_listing(&self, page: u32) -> Vec<LayerEntry> {
        self.layers.listing(&self.store, page)
    }

    pub fn annotations_on(&self, page: u32) -> PageAnnotations<'_> {
        self.store.query(page)
    }

    /// Topmost visible annotation under `point`
    pub fn hit_test(&self, page: u32, point: &PageCoordinate) -> Option<&Annotation> {
        self.store
            .hit_test(page, point, self.config.hit_tolerance)
            .into_iter()
            .find(|annotation| self.layers.is_visible(annotation.layer()))
    }

    /// Project `page` at `zoom`, reusing the cached frame when nothing changed
    ///
    /// Raster annotations that are not decoded yet start decoding and are
    /// listed in [`Frame::deferred`]; call [`EditorSession::poll_decodes`]
    /// later to learn when to render again.
    pub fn render(&mut self, page: u32, zoom: f32) -> AnnotationResult<Arc<Frame>> {
        self.check_page(page)?;
        let key = (page, zoom.to_bits());
        if let Some(frame) = self.frames.get(&key) {
            return Ok(Arc::clone(frame));
        }

        for annotation in self.store.query(page) {
            if let Payload::Raster(raster) = annotation.payload() {
                if self.layers.is_visible(annotation.layer()) {
                    self.rasters.request(raster, page);
                }
            }
        }

        let projection =
            self.projector
                .project(page, zoom, self.store.annotations(), self.layers.visibility(), &self.rasters);
        let size = self.document.page_size(page).unwrap_or_default();
        let frame = Arc::new(Frame {
            page,
            zoom,
            backdrop: Rect::new(0.0, 0.0, size.width_pt * zoom, size.height_pt * zoom),
            primitives: projection.primitives,
            deferred: projection.deferred,
        });

        debug!(page, zoom, primitives = frame.primitives.len(), deferred = frame.deferred.len(), "frame projected");
        self.frames.retain(|(cached_page, _), _| *cached_page != page);
        self.frames.insert(key, Arc::clone(&frame));
        Ok(frame)
    }

    /// Collect finished raster decodes and return the pages to redraw
    ///
    /// Never blocks.
    pub fn poll_decodes(&mut self) -> BTreeSet<u32> {
        let pages = self.rasters.poll();
        self.invalidate(&pages);
        pages
    }

    /// Wait up to `timeout` for outstanding decodes, for batch callers
    pub fn wait_for_decodes(&mut self, timeout: Duration) -> BTreeSet<u32> {
        let pages = self.rasters.poll_blocking(timeout);
        self.invalidate(&pages);
        pages
    }

    pub fn set_transport(&mut self, transport: Box<dyn AnnotationTransport>) {
        self.transport = Some(transport);
    }

    /// Deliver pending changes; `None` without a transport
    pub fn flush_transport(&mut self) -> Option<FlushReport> {
        let transport = self.transport.as_deref_mut()?;
        Some(self.outbox.flush(transport))
    }

    /// Retry deliveries that failed earlier
    pub fn retry_transport(&mut self) -> Option<FlushReport> {
        let transport = self.transport.as_deref_mut()?;
        Some(self.outbox.retry_failed(transport))
    }

    /// Replace local annotations with the transport's copy
    ///
    /// Undo history restarts from the loaded state.
    pub fn load_from_transport(&mut self) -> Result<usize, TransportError> {
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| TransportError::Unavailable("no transport configured".to_string()))?;

        let annotations = transport.load()?;
        let loaded = self.store.replace_all(annotations);
        let dirty = self.store.take_dirty_pages();
        self.invalidate(&dirty);
        self.trim_rasters();

        info!(loaded, "annotations loaded from transport");
        Ok(loaded)
    }

    fn check_page(&self, page: u32) -> AnnotationResult<()> {
        if self.document.contains(page) {
            Ok(())
        } else {
            Err(AnnotationError::PageOutOfRange { page, page_count: self.document.page_count() })
        }
    }

    /// Run a store mutation, then invalidate frames and forward the change
    fn mutate<T>(&mut self, op: impl FnOnce(&mut AnnotationStore) -> T) -> T {
        let before = self.store.current_snapshot();
        let result = op(&mut self.store);

        let dirty = self.store.take_dirty_pages();
        if dirty.is_empty() {
            return result;
        }
        self.invalidate(&dirty);
        self.trim_rasters();

        if let Some(transport) = self.transport.as_deref_mut() {
            self.outbox.enqueue(diff_snapshots(&before, self.store.annotations()));
            self.outbox.flush(transport);
        }
        result
    }

    /// Release decoded rasters no annotation in the store refers to
    fn trim_rasters(&mut self) {
        if self.rasters.is_empty() {
            return;
        }
        let live: HashSet<_> = self
            .store
            .annotations()
            .iter()
            .filter_map(|annotation| annotation.raster().map(RasterPayload::key))
            .collect();
        self.rasters.retain_keys(&live);
    }

    fn invalidate(&mut self, pages: &BTreeSet<u32>) {
        if !pages.is_empty() {
            self.frames.retain(|(page, _), _| !pages.contains(page));
        }
    }
}

impl std::fmt::Debug for EditorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorSession")
            .field("annotations", &self.store.len())
            .field("pages", &self.document.page_count())
            .field("cached_frames", &self.frames.len())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationKind, RasterPayload, Size};
    use crate::decode::tests::png_bytes;
    use crate::document::PlaceholderDocument;
    use crate::projection::Primitive;
    use crate::transport::MemoryTransport;
    use pretty_assertions::assert_eq;

    fn rect(page: u32, layer: u32) -> AnnotationDraft {
        AnnotationDraft::shape(
            AnnotationKind::Rectangle,
            page,
            PageCoordinate::new(10.0, 10.0),
            Size::new(30.0, 30.0),
        )
        .on_layer(layer)
    }

    fn commit(session: &mut EditorSession, draft: AnnotationDraft) -> Annotation {
        session.commit(draft).unwrap().into_annotation().unwrap()
    }

    #[test]
    fn test_commit_checks_page_range() {
        let mut session = EditorSession::new(PlaceholderDocument::new(2));
        assert_eq!(
            session.commit(rect(3, 0)).unwrap_err(),
            AnnotationError::PageOutOfRange { page: 3, page_count: 2 }
        );
        assert!(session.store().is_empty());
    }

    #[test]
    fn test_update_checks_target_page() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        let a = commit(&mut session, rect(1, 0));
        let result = session.update(a.id(), &AnnotationPatch::new().with_page(4));
        assert!(matches!(result, Err(AnnotationError::PageOutOfRange { page: 4, .. })));
    }

    #[test]
    fn test_render_has_scaled_backdrop() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        let frame = session.render(1, 2.0).unwrap();
        assert_eq!(frame.backdrop, Rect::new(0.0, 0.0, 1224.0, 1584.0));
        assert!(frame.primitives.is_empty());
        assert!(session.render(2, 1.0).is_err());
    }

    #[test]
    fn test_frames_are_cached_until_the_page_changes() {
        let mut session = EditorSession::new(PlaceholderDocument::new(2));
        commit(&mut session, rect(1, 0));

        let first = session.render(1, 1.0).unwrap();
        let other_page = session.render(2, 1.0).unwrap();
        assert!(Arc::ptr_eq(&first, &session.render(1, 1.0).unwrap()));

        commit(&mut session, rect(1, 0));
        let second = session.render(1, 1.0).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.primitives.len(), 2);
        assert!(Arc::ptr_eq(&other_page, &session.render(2, 1.0).unwrap()));
    }

    #[test]
    fn test_frame_cache_keeps_latest_zoom_per_page() {
        let mut session = EditorSession::new(PlaceholderDocument::new(2));
        commit(&mut session, rect(1, 0));

        for step in 1..=20 {
            session.render(1, step as f32 * 0.1).unwrap();
        }
        session.render(2, 1.0).unwrap();
        assert_eq!(session.frames.len(), 2);

        let latest = session.render(1, 2.0).unwrap();
        assert!(Arc::ptr_eq(&latest, &session.render(1, 2.0).unwrap()));
        assert_eq!(session.frames.len(), 2);
    }

    #[test]
    fn test_deleting_raster_annotation_releases_decode() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        let payload = RasterPayload::png(png_bytes(6, 6));
        let draft = AnnotationDraft::raster(
            AnnotationKind::Image,
            1,
            PageCoordinate::new(0.0, 0.0),
            Size::new(40.0, 40.0),
            payload.clone(),
        );
        let first = commit(&mut session, draft.clone());
        let second = commit(&mut session, draft);

        session.render(1, 1.0).unwrap();
        session.wait_for_decodes(Duration::from_secs(10));
        assert_eq!(session.rasters.len(), 1);

        // Still referenced by the second image
        session.delete(first.id()).unwrap();
        assert!(session.rasters.get(payload.key()).is_some());

        session.delete(second.id()).unwrap();
        assert!(session.rasters.is_empty());

        // Undo brings the annotation back; rendering decodes it again
        session.undo().unwrap();
        let frame = session.render(1, 1.0).unwrap();
        assert_eq!(frame.deferred, vec![second.id()]);
    }

    #[test]
    fn test_hidden_layer_is_not_rendered_or_hit() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        let a = commit(&mut session, rect(1, 1));
        session.render(1, 1.0).unwrap();

        session.set_layer_visible(1, false);
        assert!(session.render(1, 1.0).unwrap().primitives.is_empty());
        assert!(session.hit_test(1, &PageCoordinate::new(20.0, 20.0)).is_none());

        session.set_layer_visible(1, true);
        assert_eq!(session.hit_test(1, &PageCoordinate::new(20.0, 20.0)).map(Annotation::id), Some(a.id()));
    }

    #[test]
    fn test_undo_redo_restores_identical_state() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        commit(&mut session, rect(1, 0));
        let a = commit(&mut session, rect(1, 1));
        session.move_layer(1, LayerDirection::Down);
        let after = session.store().annotations().to_vec();

        session.undo().unwrap();
        assert_eq!(session.store().get(a.id()).unwrap().layer(), 1);
        session.redo().unwrap();
        assert_eq!(session.store().annotations(), after.as_slice());
    }

    #[test]
    fn test_pending_decode_defers_then_blits() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        let image = commit(
            &mut session,
            AnnotationDraft::raster(
                AnnotationKind::Image,
                1,
                PageCoordinate::new(0.0, 0.0),
                Size::new(40.0, 20.0),
                RasterPayload::png(png_bytes(8, 4)),
            ),
        );

        let frame = session.render(1, 1.0).unwrap();
        assert_eq!(frame.deferred, vec![image.id()]);
        assert!(frame.primitives.is_empty());

        let pages = session.wait_for_decodes(Duration::from_secs(10));
        assert_eq!(pages, BTreeSet::from([1]));

        let frame = session.render(1, 1.0).unwrap();
        assert!(frame.deferred.is_empty());
        assert!(matches!(
            frame.primitives[0].primitive,
            Primitive::ImageBlit { pixel_width: 8, pixel_height: 4, .. }
        ));
    }

    #[test]
    fn test_transport_receives_every_change() {
        let remote = MemoryTransport::new();
        let mut session = EditorSession::new(PlaceholderDocument::new(1)).with_transport(remote.clone());

        let a = commit(&mut session, rect(1, 0));
        let b = commit(&mut session, rect(1, 2));
        session.delete(a.id()).unwrap();
        assert_eq!(remote.annotations(), vec![b.clone()]);

        session.undo().unwrap();
        assert_eq!(remote.annotations().len(), 2);
    }

    #[test]
    fn test_transport_failure_keeps_local_state_and_retries() {
        let remote = MemoryTransport::new();
        let mut session = EditorSession::new(PlaceholderDocument::new(1)).with_transport(remote.clone());

        remote.set_offline(true);
        let a = commit(&mut session, rect(1, 0));
        assert_eq!(session.store().len(), 1);
        assert_eq!(session.store().history().len(), 1);
        assert_eq!(session.outbox().failures().len(), 1);

        remote.set_offline(false);
        let report = session.retry_transport().unwrap();
        assert_eq!(report, FlushReport { delivered: 1, failed: 0 });
        assert_eq!(remote.annotations(), vec![a]);
    }

    #[test]
    fn test_rejected_commit_sends_nothing() {
        let remote = MemoryTransport::new();
        let mut session = EditorSession::new(PlaceholderDocument::new(1)).with_transport(remote.clone());

        let draft = AnnotationDraft::shape(
            AnnotationKind::Rectangle,
            1,
            PageCoordinate::new(0.0, 0.0),
            Size::new(2.0, 2.0),
        );
        assert!(!session.commit(draft).unwrap().is_committed());
        assert_eq!(remote.deliveries(), 0);
    }

    #[test]
    fn test_load_from_transport_resets_history() {
        let remote = MemoryTransport::new();
        let mut writer = EditorSession::new(PlaceholderDocument::new(1)).with_transport(remote.clone());
        commit(&mut writer, rect(1, 0));
        commit(&mut writer, rect(1, 3));

        let mut reader = EditorSession::new(PlaceholderDocument::new(1)).with_transport(remote.clone());
        assert_eq!(reader.load_from_transport().unwrap(), 2);
        assert_eq!(reader.store().annotations(), writer.store().annotations());
        assert!(!reader.can_undo());
        assert_eq!(reader.layer_listing(1).iter().map(|l| l.key).collect::<Vec<_>>(), vec![3, 0]);
    }

    #[test]
    fn test_load_without_transport_fails() {
        let mut session = EditorSession::new(PlaceholderDocument::new(1));
        assert!(matches!(session.load_from_transport(), Err(TransportError::Unavailable(_))));
        assert!(session.flush_transport().is_none());
    }
}
