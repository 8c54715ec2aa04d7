//! Annotation transport
//!
//! Local state is authoritative. Every committed change is forwarded to an
//! [`AnnotationTransport`] through the session's [`Outbox`]; delivery
//! failures are recorded for a later retry and never roll back the store.

use crate::annotation::{Annotation, AnnotationId};
use crate::signature::{SignatureEntry, SignatureLibrary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

const SIDECAR_SCHEMA_VERSION: u32 = 1;
const SIDECAR_SUFFIX: &str = ".annotations.json";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported sidecar schema version {0}")]
    UnsupportedVersion(u32),
}

/// Destination for committed annotation changes
pub trait AnnotationTransport: Send {
    /// Create or replace one annotation
    fn store(&mut self, annotation: &Annotation) -> Result<(), TransportError>;

    fn remove(&mut self, id: AnnotationId) -> Result<(), TransportError>;

    /// Every stored annotation
    fn load(&mut self) -> Result<Vec<Annotation>, TransportError>;
}

/// One change awaiting delivery
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxOp {
    Store(Annotation),
    Remove(AnnotationId),
}

impl OutboxOp {
    pub fn annotation_id(&self) -> AnnotationId {
        match self {
            OutboxOp::Store(annotation) => annotation.id(),
            OutboxOp::Remove(id) => *id,
        }
    }

    fn deliver(&self, transport: &mut dyn AnnotationTransport) -> Result<(), TransportError> {
        match self {
            OutboxOp::Store(annotation) => transport.store(annotation),
            OutboxOp::Remove(id) => transport.remove(*id),
        }
    }
}

/// Changes needed to turn `before` into `after`
///
/// Removals come first, then creates and modifications in `after` order.
pub fn diff_snapshots(before: &[Annotation], after: &[Annotation]) -> Vec<OutboxOp> {
    let previous: HashMap<AnnotationId, &Annotation> =
        before.iter().map(|annotation| (annotation.id(), annotation)).collect();
    let current: HashSet<AnnotationId> = after.iter().map(Annotation::id).collect();

    let removals = before
        .iter()
        .filter(|annotation| !current.contains(&annotation.id()))
        .map(|annotation| OutboxOp::Remove(annotation.id()));

    let stores = after
        .iter()
        .filter(|annotation| previous.get(&annotation.id()) != Some(annotation))
        .map(|annotation| OutboxOp::Store(annotation.clone()));

    removals.chain(stores).collect()
}

/// An operation the transport rejected
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDelivery {
    pub op: OutboxOp,
    pub error: String,
}

/// Counts from one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Queue of changes between the store and a transport
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    pending: VecDeque<OutboxOp>,
    failed: Vec<FailedDelivery>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue changes; earlier failures for the same annotations are superseded
    pub fn enqueue(&mut self, ops: impl IntoIterator<Item = OutboxOp>) {
        for op in ops {
            let id = op.annotation_id();
            self.failed.retain(|failure| failure.op.annotation_id() != id);
            self.pending.push_back(op);
        }
    }

    /// Deliver everything pending, in order
    pub fn flush(&mut self, transport: &mut dyn AnnotationTransport) -> FlushReport {
        let mut report = FlushReport::default();

        while let Some(op) = self.pending.pop_front() {
            match op.deliver(transport) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(id = %op.annotation_id(), %error, "annotation delivery failed");
                    report.failed += 1;
                    self.failed.push(FailedDelivery { op, error: error.to_string() });
                }
            }
        }

        report
    }

    /// Requeue every failed delivery ahead of new work and flush
    pub fn retry_failed(&mut self, transport: &mut dyn AnnotationTransport) -> FlushReport {
        for failure in self.failed.drain(..).rev() {
            self.pending.push_front(failure.op);
        }
        self.flush(transport)
    }

    pub fn failures(&self) -> &[FailedDelivery] {
        &self.failed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    annotations: Vec<Annotation>,
    offline: bool,
    deliveries: usize,
}

/// In-process transport with switchable failure
///
/// Clones share state, so a test can keep a handle after giving one to a
/// session.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`TransportError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.state().annotations.clone()
    }

    /// Number of successful store and remove calls
    pub fn deliveries(&self) -> usize {
        self.state().deliveries
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self) -> Result<MutexGuard<'_, MemoryState>, TransportError> {
        let state = self.state();
        if state.offline {
            return Err(TransportError::Unavailable("memory transport is offline".to_string()));
        }
        Ok(state)
    }
}

impl AnnotationTransport for MemoryTransport {
    fn store(&mut self, annotation: &Annotation) -> Result<(), TransportError> {
        let mut state = self.online()?;
        match state.annotations.iter_mut().find(|existing| existing.id() == annotation.id()) {
            Some(existing) => *existing = annotation.clone(),
            None => state.annotations.push(annotation.clone()),
        }
        state.deliveries += 1;
        Ok(())
    }

    fn remove(&mut self, id: AnnotationId) -> Result<(), TransportError> {
        let mut state = self.online()?;
        state.annotations.retain(|annotation| annotation.id() != id);
        state.deliveries += 1;
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<Annotation>, TransportError> {
        Ok(self.online()?.annotations.clone())
    }
}

/// Viewer state saved next to the annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub name: String,
    pub current_page: u32,
    pub zoom_level: f32,
    pub last_modified: DateTime<Utc>,
}

impl ProjectState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), current_page: 1, zoom_level: 1.0, last_modified: Utc::now() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SidecarEnvelope {
    version: u32,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(default)]
    signatures: Vec<SignatureEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<ProjectState>,
}

/// JSON sidecar stored beside the document
///
/// `report.pdf` keeps its annotations in `report.pdf.annotations.json`.
/// Every write replaces the whole file through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct JsonFileTransport {
    path: PathBuf,
}

impl JsonFileTransport {
    pub fn for_document(document_path: &Path) -> Self {
        Self { path: sidecar_path(document_path) }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load_signatures(&self) -> Result<SignatureLibrary, TransportError> {
        Ok(SignatureLibrary::from_entries(self.read()?.signatures))
    }

    pub fn save_signatures(&self, library: &SignatureLibrary) -> Result<(), TransportError> {
        let mut envelope = self.read()?;
        envelope.signatures = library.list().to_vec();
        self.write(&envelope)
    }

    pub fn load_project(&self) -> Result<Option<ProjectState>, TransportError> {
        Ok(self.read()?.project)
    }

    pub fn save_project(&self, project: &ProjectState) -> Result<(), TransportError> {
        let mut envelope = self.read()?;
        envelope.project = Some(project.clone());
        self.write(&envelope)
    }

    fn read(&self) -> Result<SidecarEnvelope, TransportError> {
        if !self.path.exists() {
            return Ok(SidecarEnvelope { version: SIDECAR_SCHEMA_VERSION, ..Default::default() });
        }

        let bytes = fs::read(&self.path)?;
        let envelope: SidecarEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version > SIDECAR_SCHEMA_VERSION {
            return Err(TransportError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }

    fn write(&self, envelope: &SidecarEnvelope) -> Result<(), TransportError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let envelope = SidecarEnvelope { version: SIDECAR_SCHEMA_VERSION, ..envelope.clone() };
        let json = serde_json::to_vec_pretty(&envelope)?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl AnnotationTransport for JsonFileTransport {
    fn store(&mut self, annotation: &Annotation) -> Result<(), TransportError> {
        let mut envelope = self.read()?;
        match envelope.annotations.iter_mut().find(|existing| existing.id() == annotation.id()) {
            Some(existing) => *existing = annotation.clone(),
            None => envelope.annotations.push(annotation.clone()),
        }
        self.write(&envelope)
    }

    fn remove(&mut self, id: AnnotationId) -> Result<(), TransportError> {
        let mut envelope = self.read()?;
        envelope.annotations.retain(|annotation| annotation.id() != id);
        self.write(&envelope)
    }

    fn load(&mut self) -> Result<Vec<Annotation>, TransportError> {
        let annotations = self.read()?.annotations;
        info!(path = %self.path.display(), count = annotations.len(), "annotations loaded");
        Ok(annotations)
    }
}

/// Sidecar path for a document: the full file name plus `.annotations.json`
pub fn sidecar_path(document_path: &Path) -> PathBuf {
    let mut path = document_path.as_os_str().to_owned();
    path.push(SIDECAR_SUFFIX);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationDraft, AnnotationKind, AnnotationPatch, PageCoordinate, RasterPayload, Size};
    use crate::store::AnnotationStore;
    use pretty_assertions::assert_eq;

    fn rect(store: &mut AnnotationStore) -> Annotation {
        let draft = AnnotationDraft::shape(
            AnnotationKind::Rectangle,
            1,
            PageCoordinate::new(0.0, 0.0),
            Size::new(10.0, 10.0),
        );
        store.commit(draft).unwrap().into_annotation().unwrap()
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/docs/report.pdf")),
            PathBuf::from("/docs/report.pdf.annotations.json")
        );
    }

    #[test]
    fn test_diff_snapshots() {
        let mut store = AnnotationStore::new();
        let a = rect(&mut store);
        let b = rect(&mut store);
        let before = store.annotations().to_vec();

        store.delete(a.id()).unwrap();
        let b2 = store.update(b.id(), &AnnotationPatch::new().with_layer(3)).unwrap();
        let c = rect(&mut store);

        let ops = diff_snapshots(&before, store.annotations());
        assert_eq!(ops, vec![OutboxOp::Remove(a.id()), OutboxOp::Store(b2), OutboxOp::Store(c)]);
        assert!(diff_snapshots(store.annotations(), store.annotations()).is_empty());
    }

    #[test]
    fn test_outbox_records_failures_and_retries() {
        let mut store = AnnotationStore::new();
        let a = rect(&mut store);

        let remote = MemoryTransport::new();
        let mut transport = remote.clone();
        let mut outbox = Outbox::new();

        remote.set_offline(true);
        outbox.enqueue(vec![OutboxOp::Store(a.clone())]);
        let report = outbox.flush(&mut transport);

        assert_eq!(report, FlushReport { delivered: 0, failed: 1 });
        assert_eq!(outbox.failures().len(), 1);
        assert!(remote.annotations().is_empty());

        remote.set_offline(false);
        let report = outbox.retry_failed(&mut transport);
        assert_eq!(report, FlushReport { delivered: 1, failed: 0 });
        assert!(outbox.is_idle());
        assert_eq!(remote.annotations(), vec![a]);
    }

    #[test]
    fn test_newer_change_supersedes_failed_delivery() {
        let mut store = AnnotationStore::new();
        let a = rect(&mut store);
        let a2 = store.update(a.id(), &AnnotationPatch::new().with_layer(2)).unwrap();

        let remote = MemoryTransport::new();
        let mut transport = remote.clone();
        let mut outbox = Outbox::new();

        remote.set_offline(true);
        outbox.enqueue(vec![OutboxOp::Store(a)]);
        outbox.flush(&mut transport);
        remote.set_offline(false);

        outbox.enqueue(vec![OutboxOp::Store(a2.clone())]);
        assert!(outbox.failures().is_empty());
        outbox.flush(&mut transport);
        assert_eq!(remote.annotations(), vec![a2]);
    }

    #[test]
    fn test_json_file_transport_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = JsonFileTransport::for_document(&dir.path().join("doc.pdf"));
        assert!(transport.load().unwrap().is_empty());

        let mut store = AnnotationStore::new();
        let a = rect(&mut store);
        let image = store
            .commit(AnnotationDraft::raster(
                AnnotationKind::Image,
                2,
                PageCoordinate::new(1.0, 1.0),
                Size::new(20.0, 20.0),
                RasterPayload::png(vec![1, 2, 3, 4]),
            ))
            .unwrap()
            .into_annotation()
            .unwrap();

        transport.store(&a).unwrap();
        transport.store(&image).unwrap();
        transport.remove(a.id()).unwrap();

        assert!(transport.exists());
        assert_eq!(transport.load().unwrap(), vec![image]);
    }

    #[test]
    fn test_signatures_and_project_share_the_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = JsonFileTransport::with_path(dir.path().join("nested/state.json"));

        let mut library = SignatureLibrary::new();
        library.add("mine", RasterPayload::png(vec![7]));
        transport.save_signatures(&library).unwrap();

        let mut project = ProjectState::new("Contract");
        project.current_page = 3;
        project.zoom_level = 1.5;
        transport.save_project(&project).unwrap();

        let mut store = AnnotationStore::new();
        transport.store(&rect(&mut store)).unwrap();

        assert_eq!(transport.load_signatures().unwrap(), library);
        assert_eq!(transport.load_project().unwrap(), Some(project));
        assert_eq!(transport.load().unwrap().len(), 1);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, r#"{"version": 99, "annotations": []}"#).unwrap();

        let mut transport = JsonFileTransport::with_path(&path);
        assert!(matches!(transport.load(), Err(TransportError::UnsupportedVersion(99))));
    }
}
