//! Pointer interaction
//!
//! Turns tool selection and pointer events into drafts and commits. Drawing
//! tools follow a two-state machine: pointer-down enters `Dragging`,
//! pointer-move updates the preview, pointer-up commits through the
//! session. Drags smaller than the drag threshold are dropped silently.

use crate::annotation::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationKind, Color, PageCoordinate, RasterPayload, Size,
};
use crate::error::AnnotationResult;
use crate::session::EditorSession;
use crate::signature::SignatureEntry;
use crate::store::CommitOutcome;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Active editing tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Select,
    Text,
    Rectangle,
    Circle,
    Highlight,
    Arrow,
    Image,
    Signature,
}

impl Tool {
    /// Annotation kind drawn by dragging with this tool
    pub fn drawing_kind(self) -> Option<AnnotationKind> {
        match self {
            Tool::Rectangle => Some(AnnotationKind::Rectangle),
            Tool::Circle => Some(AnnotationKind::Circle),
            Tool::Highlight => Some(AnnotationKind::Highlight),
            Tool::Arrow => Some(AnnotationKind::Arrow),
            Tool::Select | Tool::Text | Tool::Image | Tool::Signature => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging {
        kind: AnnotationKind,
        start: PageCoordinate,
        current: PageCoordinate,
    },
}

/// What a pointer event or placement did
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    /// Nothing applies to the current tool or state
    Ignored,
    /// A drag began
    Started,
    Committed(Annotation),
    /// The drag was below the threshold and dropped
    Discarded,
    /// Select tool hit-test result
    Selected(Option<AnnotationId>),
}

/// Min corner and absolute size of the box spanned by two drag points
pub fn normalized_draft_rect(start: PageCoordinate, current: PageCoordinate) -> (PageCoordinate, Size) {
    (
        PageCoordinate::new(start.x.min(current.x), start.y.min(current.y)),
        Size::new((current.x - start.x).abs(), (current.y - start.y).abs()),
    )
}

#[derive(Debug, Clone)]
pub struct InteractionController {
    tool: Tool,
    state: GestureState,
    page: u32,
    layer: u32,
    color: Option<Color>,
    font_size: Option<f32>,
    selection: Option<AnnotationId>,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionController {
    pub fn new() -> Self {
        Self {
            tool: Tool::default(),
            state: GestureState::Idle,
            page: 1,
            layer: 0,
            color: None,
            font_size: None,
            selection: None,
        }
    }

    /// Switch tools, abandoning any drag in progress
    pub fn set_tool(&mut self, tool: Tool) {
        self.cancel();
        self.tool = tool;
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn set_page(&mut self, page: u32) {
        self.cancel();
        self.page = page;
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn set_layer(&mut self, layer: u32) {
        self.layer = layer;
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn set_color(&mut self, color: Option<Color>) {
        self.color = color;
    }

    pub fn set_font_size(&mut self, font_size: Option<f32>) {
        self.font_size = font_size;
    }

    pub fn selection(&self) -> Option<AnnotationId> {
        self.selection
    }

    pub fn pointer_down(&mut self, session: &EditorSession, point: PageCoordinate) -> GestureOutcome {
        if self.tool == Tool::Select {
            self.selection = session.hit_test(self.page, &point).map(Annotation::id);
            return GestureOutcome::Selected(self.selection);
        }

        match (self.state, self.tool.drawing_kind()) {
            (GestureState::Idle, Some(kind)) => {
                self.state = GestureState::Dragging { kind, start: point, current: point };
                GestureOutcome::Started
            }
            _ => GestureOutcome::Ignored,
        }
    }

    /// Track the pointer; returns the preview draft while dragging
    pub fn pointer_move(&mut self, point: PageCoordinate) -> Option<AnnotationDraft> {
        let GestureState::Dragging { kind, start, .. } = self.state else {
            return None;
        };
        self.state = GestureState::Dragging { kind, start, current: point };
        Some(self.drag_draft(kind, start, point))
    }

    /// Current preview draft, if dragging
    pub fn preview(&self) -> Option<AnnotationDraft> {
        match self.state {
            GestureState::Dragging { kind, start, current } => Some(self.drag_draft(kind, start, current)),
            GestureState::Idle => None,
        }
    }

    /// Finish a drag and commit it
    pub fn pointer_up(&mut self, session: &mut EditorSession, point: PageCoordinate) -> AnnotationResult<GestureOutcome> {
        let GestureState::Dragging { kind, start, .. } = std::mem::take(&mut self.state) else {
            return Ok(GestureOutcome::Ignored);
        };

        let draft = self.styled(self.drag_draft(kind, start, point), session);
        self.commit(session, draft)
    }

    /// Abandon a drag; returns true if one was in progress
    pub fn cancel(&mut self) -> bool {
        let was_dragging = matches!(self.state, GestureState::Dragging { .. });
        self.state = GestureState::Idle;
        was_dragging
    }

    /// Place a text annotation at `point` with the text tool
    pub fn place_text(
        &mut self,
        session: &mut EditorSession,
        point: PageCoordinate,
        text: &str,
    ) -> AnnotationResult<GestureOutcome> {
        if self.tool != Tool::Text || text.trim().is_empty() {
            return Ok(GestureOutcome::Ignored);
        }

        let font_size = self.font_size.unwrap_or(session.config().default_font_size);
        let draft = AnnotationDraft::text(self.page, point, text)
            .on_layer(self.layer)
            .with_font_size(font_size);
        let draft = self.styled(draft, session);
        self.commit(session, draft)
    }

    /// Place an image at `point` with the image tool
    pub fn place_image(
        &mut self,
        session: &mut EditorSession,
        point: PageCoordinate,
        payload: RasterPayload,
    ) -> AnnotationResult<GestureOutcome> {
        if self.tool != Tool::Image {
            return Ok(GestureOutcome::Ignored);
        }

        let size = session.config().placed_raster_size;
        let draft = AnnotationDraft::raster(AnnotationKind::Image, self.page, point, size, payload).on_layer(self.layer);
        self.commit(session, draft)
    }

    /// Place a saved signature at `point` with the signature tool
    pub fn place_signature(
        &mut self,
        session: &mut EditorSession,
        point: PageCoordinate,
        entry: &SignatureEntry,
    ) -> AnnotationResult<GestureOutcome> {
        if self.tool != Tool::Signature {
            return Ok(GestureOutcome::Ignored);
        }

        let size = session.config().placed_raster_size;
        let draft = entry.to_draft(self.page, point, size).on_layer(self.layer);
        self.commit(session, draft)
    }

    fn drag_draft(&self, kind: AnnotationKind, start: PageCoordinate, current: PageCoordinate) -> AnnotationDraft {
        let (origin, size) = normalized_draft_rect(start, current);
        let mut draft = AnnotationDraft::shape(kind, self.page, origin, size).on_layer(self.layer);
        if let Some(color) = self.color {
            draft = draft.with_color(color);
        }
        draft
    }

    fn styled(&self, draft: AnnotationDraft, session: &EditorSession) -> AnnotationDraft {
        match self.color.or(session.config().default_color) {
            Some(color) => draft.with_color(color),
            None => draft,
        }
    }

    fn commit(&mut self, session: &mut EditorSession, draft: AnnotationDraft) -> AnnotationResult<GestureOutcome> {
        match session.commit(draft)? {
            CommitOutcome::Committed(annotation) => {
                debug!(id = %annotation.id(), tool = ?self.tool, "gesture committed");
                Ok(GestureOutcome::Committed(annotation))
            }
            CommitOutcome::Rejected(rejection) => {
                debug!(?rejection, "gesture discarded");
                Ok(GestureOutcome::Discarded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PlaceholderDocument;
    use crate::error::AnnotationError;
    use crate::signature::SignatureLibrary;

    fn session() -> EditorSession {
        EditorSession::new(PlaceholderDocument::new(3))
    }

    fn drag(
        controller: &mut InteractionController,
        session: &mut EditorSession,
        from: (f32, f32),
        to: (f32, f32),
    ) -> GestureOutcome {
        controller.pointer_down(session, PageCoordinate::new(from.0, from.1));
        controller.pointer_move(PageCoordinate::new(to.0, to.1));
        controller.pointer_up(session, PageCoordinate::new(to.0, to.1)).unwrap()
    }

    #[test]
    fn test_normalized_rect() {
        let (origin, size) = normalized_draft_rect(PageCoordinate::new(50.0, 10.0), PageCoordinate::new(20.0, 40.0));
        assert_eq!(origin, PageCoordinate::new(20.0, 10.0));
        assert_eq!(size, Size::new(30.0, 30.0));
    }

    #[test]
    fn test_drag_commits_rectangle() {
        let mut session = session();
        let mut controller = InteractionController::new();
        controller.set_tool(Tool::Rectangle);
        controller.set_page(2);
        controller.set_layer(4);

        let outcome = drag(&mut controller, &mut session, (100.0, 100.0), (40.0, 60.0));
        let GestureOutcome::Committed(annotation) = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };

        assert_eq!(annotation.kind(), AnnotationKind::Rectangle);
        assert_eq!(annotation.page(), 2);
        assert_eq!(annotation.layer(), 4);
        assert_eq!(annotation.geometry().origin, PageCoordinate::new(40.0, 60.0));
        assert_eq!(annotation.geometry().size, Some(Size::new(60.0, 40.0)));
        assert_eq!(controller.state(), GestureState::Idle);
    }

    #[test]
    fn test_click_without_drag_is_discarded() {
        let mut session = session();
        let mut controller = InteractionController::new();
        controller.set_tool(Tool::Circle);

        let outcome = drag(&mut controller, &mut session, (10.0, 10.0), (12.0, 11.0));
        assert_eq!(outcome, GestureOutcome::Discarded);
        assert!(session.store().is_empty());
        assert!(session.store().history().is_empty());
    }

    #[test]
    fn test_preview_tracks_pointer() {
        let session = session();
        let mut controller = InteractionController::new();
        controller.set_tool(Tool::Highlight);

        assert!(controller.pointer_move(PageCoordinate::new(1.0, 1.0)).is_none());
        assert_eq!(controller.pointer_down(&session, PageCoordinate::new(0.0, 0.0)), GestureOutcome::Started);

        let preview = controller.pointer_move(PageCoordinate::new(-10.0, 20.0)).unwrap();
        assert_eq!(preview.geometry.origin, PageCoordinate::new(-10.0, 0.0));
        assert_eq!(preview.geometry.size, Some(Size::new(10.0, 20.0)));
        assert_eq!(controller.preview(), Some(preview));
    }

    #[test]
    fn test_cancel_abandons_drag() {
        let mut session = session();
        let mut controller = InteractionController::new();
        controller.set_tool(Tool::Arrow);

        controller.pointer_down(&session, PageCoordinate::new(0.0, 0.0));
        assert!(controller.cancel());
        assert!(!controller.cancel());

        let outcome = controller.pointer_up(&mut session, PageCoordinate::new(90.0, 90.0)).unwrap();
        assert_eq!(outcome, GestureOutcome::Ignored);
        assert!(session.store().is_empty());
    }

    #[test]
    fn test_place_text_uses_defaults() {
        let mut session = session();
        let mut controller = InteractionController::new();

        let ignored = controller.place_text(&mut session, PageCoordinate::new(5.0, 5.0), "hello").unwrap();
        assert_eq!(ignored, GestureOutcome::Ignored);

        controller.set_tool(Tool::Text);
        controller.set_color(Some(Color::BLUE));
        let GestureOutcome::Committed(annotation) =
            controller.place_text(&mut session, PageCoordinate::new(5.0, 5.0), "hello").unwrap()
        else {
            panic!("text was not committed");
        };

        assert_eq!(annotation.text(), Some("hello"));
        assert_eq!(annotation.font_size(), 16.0);
        assert_eq!(annotation.style().color, Some(Color::BLUE));
        assert_eq!(controller.state(), GestureState::Idle);

        let blank = controller.place_text(&mut session, PageCoordinate::new(5.0, 5.0), "  ").unwrap();
        assert_eq!(blank, GestureOutcome::Ignored);
    }

    #[test]
    fn test_place_image_and_signature() {
        let mut session = session();
        let mut controller = InteractionController::new();

        controller.set_tool(Tool::Image);
        let outcome = controller
            .place_image(&mut session, PageCoordinate::new(0.0, 0.0), RasterPayload::png(vec![1]))
            .unwrap();
        let GestureOutcome::Committed(image) = outcome else {
            panic!("image was not committed");
        };
        assert_eq!(image.geometry().size, Some(Size::new(150.0, 60.0)));

        let mut library = SignatureLibrary::new();
        let id = library.add("me", RasterPayload::png(vec![2]));
        let entry = library.get(id).unwrap().clone();

        controller.set_tool(Tool::Signature);
        let outcome = controller.place_signature(&mut session, PageCoordinate::new(10.0, 10.0), &entry).unwrap();
        assert!(matches!(outcome, GestureOutcome::Committed(ref a) if a.kind() == AnnotationKind::Signature));
        assert_eq!(session.store().len(), 2);
    }

    #[test]
    fn test_select_hits_topmost() {
        let mut session = session();
        let mut controller = InteractionController::new();

        controller.set_tool(Tool::Rectangle);
        controller.set_layer(0);
        drag(&mut controller, &mut session, (0.0, 0.0), (50.0, 50.0));
        controller.set_layer(2);
        let GestureOutcome::Committed(top) = drag(&mut controller, &mut session, (10.0, 10.0), (60.0, 60.0)) else {
            panic!("no commit");
        };

        controller.set_tool(Tool::Select);
        assert_eq!(
            controller.pointer_down(&session, PageCoordinate::new(20.0, 20.0)),
            GestureOutcome::Selected(Some(top.id()))
        );
        assert_eq!(controller.selection(), Some(top.id()));

        assert_eq!(
            controller.pointer_down(&session, PageCoordinate::new(500.0, 500.0)),
            GestureOutcome::Selected(None)
        );
    }

    #[test]
    fn test_out_of_range_page_is_an_error() {
        let mut session = session();
        let mut controller = InteractionController::new();
        controller.set_tool(Tool::Rectangle);
        controller.set_page(9);

        controller.pointer_down(&session, PageCoordinate::new(0.0, 0.0));
        let result = controller.pointer_up(&mut session, PageCoordinate::new(50.0, 50.0));
        assert!(matches!(result, Err(AnnotationError::PageOutOfRange { page: 9, .. })));
        assert_eq!(controller.state(), GestureState::Idle);
    }
}
