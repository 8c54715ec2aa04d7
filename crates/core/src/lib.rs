//! PDF Annotator Core Library
//!
//! Annotation model, layer ordering and undo/redo for a paginated document
//! editor, plus the render projection and pointer interaction built on them.

pub mod annotation;
pub mod config;
pub mod decode;
pub mod document;
pub mod error;
pub mod history;
pub mod interaction;
pub mod layers;
pub mod projection;
pub mod session;
pub mod signature;
pub mod store;
pub mod transport;

pub use annotation::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationKind, AnnotationPatch, AnnotationStyle, Color,
    Geometry, PageCoordinate, ParseColorError, Payload, RasterKey, RasterPayload, Size,
};
pub use config::{ConfigError, EditorConfig};
pub use decode::RasterCache;
pub use document::{DocumentSource, PageSize, PlaceholderDocument};
pub use error::{AnnotationError, AnnotationResult};
pub use history::{History, Snapshot};
pub use interaction::{GestureOutcome, GestureState, InteractionController, Tool};
pub use layers::{LayerDirection, LayerEntry, LayerIndex, LayerVisibility};
pub use projection::{DrawPrimitive, Primitive, Projection, Projector, RasterSource, RasterState, Rect};
pub use session::{EditorSession, Frame};
pub use signature::{SignatureEntry, SignatureId, SignatureLibrary};
pub use store::{AnnotationStore, CommitOutcome, Rejection};
pub use transport::{
    AnnotationTransport, FlushReport, JsonFileTransport, MemoryTransport, Outbox, OutboxOp, ProjectState,
    TransportError,
};
