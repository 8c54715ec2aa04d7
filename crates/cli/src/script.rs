//! JSON edit scripts
//!
//! A script describes a document and a list of steps replayed against an
//! [`EditorSession`]. Steps refer to annotations by `target`, the 0-based
//! position of the annotation among those the script has committed so far.

use anyhow::{Context, Result};
use pdf_annotator_core::{
    AnnotationDraft, AnnotationError, AnnotationId, AnnotationPatch, Color, EditorConfig, EditorSession,
    GestureOutcome, InteractionController, LayerDirection, PageCoordinate, PageSize, PlaceholderDocument,
    RasterPayload, Tool,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub document: ScriptDocument,

    /// Signatures available to `signature` steps
    #[serde(default)]
    pub signatures: Vec<ScriptSignature>,

    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read script {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("failed to parse script {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptDocument {
    pub pages: u32,
    pub page_size: PageSize,
}

impl Default for ScriptDocument {
    fn default() -> Self {
        Self { pages: 1, page_size: PageSize::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSignature {
    pub name: String,
    pub payload: RasterPayload,
}

/// One replayed edit
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Commit a draft directly, bypassing the pointer tools
    Commit { draft: AnnotationDraft },
    Tool { tool: Tool },
    Page { page: u32 },
    Layer { layer: u32 },
    Color { color: Option<Color> },
    Drag { from: [f32; 2], to: [f32; 2] },
    Click { at: [f32; 2] },
    Cancel,
    Text { at: [f32; 2], text: String },
    Image { at: [f32; 2], payload: RasterPayload },
    Signature { at: [f32; 2], name: String },
    Update { target: usize, patch: AnnotationPatch },
    Delete { target: usize },
    DeleteLayer { layer: u32 },
    MoveLayer { layer: u32, direction: LayerDirection },
    SetVisible { layer: u32, visible: bool },
    Undo,
    Redo,
}

/// A step that could not be applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedStep {
    pub step: usize,
    pub reason: String,
}

/// Replay state: the session, the pointer controller and script bookkeeping
#[derive(Debug)]
pub struct Replay {
    pub session: EditorSession,
    pub controller: InteractionController,

    /// Annotations committed by the script, in commit order
    pub created: Vec<AnnotationId>,

    pub skipped: Vec<SkippedStep>,

    /// Drafts dropped for being below the drag threshold
    pub discarded: usize,
}

impl Replay {
    pub fn new(script: &Script, config: EditorConfig) -> Self {
        let document = PlaceholderDocument::new(script.document.pages).with_page_size(script.document.page_size);
        let mut session = EditorSession::with_config(config, document);
        for signature in &script.signatures {
            session.signatures_mut().add(signature.name.clone(), signature.payload.clone());
        }

        Self {
            session,
            controller: InteractionController::new(),
            created: Vec::new(),
            skipped: Vec::new(),
            discarded: 0,
        }
    }

    /// Apply every step; failed steps are recorded and skipped
    pub fn run(&mut self, steps: &[Step]) {
        for (index, step) in steps.iter().enumerate() {
            if let Err(reason) = self.apply(step) {
                warn!(step = index, %reason, "skipping script step");
                self.skipped.push(SkippedStep { step: index, reason });
            }
        }
    }

    fn apply(&mut self, step: &Step) -> Result<(), String> {
        debug!(?step, "applying step");
        match step {
            Step::Commit { draft } => {
                let outcome = self.session.commit(draft.clone()).map_err(describe)?;
                match outcome.into_annotation() {
                    Some(annotation) => self.created.push(annotation.id()),
                    None => self.discarded += 1,
                }
            }
            Step::Tool { tool } => self.controller.set_tool(*tool),
            Step::Page { page } => self.controller.set_page(*page),
            Step::Layer { layer } => self.controller.set_layer(*layer),
            Step::Color { color } => self.controller.set_color(*color),
            Step::Drag { from, to } => {
                let outcome = self.controller.pointer_down(&self.session, point(*from));
                if outcome == GestureOutcome::Ignored {
                    return Err(format!("tool {:?} cannot draw", self.controller.tool()));
                }
                if matches!(outcome, GestureOutcome::Selected(_)) {
                    return Ok(());
                }
                self.controller.pointer_move(point(*to));
                let outcome = self.controller.pointer_up(&mut self.session, point(*to)).map_err(describe)?;
                self.record(outcome);
            }
            Step::Click { at } => {
                // A drawing click is a zero-size drag and is discarded by the store
                if self.controller.pointer_down(&self.session, point(*at)) == GestureOutcome::Started {
                    let outcome = self.controller.pointer_up(&mut self.session, point(*at)).map_err(describe)?;
                    self.record(outcome);
                }
            }
            Step::Cancel => {
                self.controller.cancel();
            }
            Step::Text { at, text } => {
                self.controller.set_tool(Tool::Text);
                let outcome = self.controller.place_text(&mut self.session, point(*at), text).map_err(describe)?;
                self.record(outcome);
            }
            Step::Image { at, payload } => {
                self.controller.set_tool(Tool::Image);
                let outcome = self
                    .controller
                    .place_image(&mut self.session, point(*at), payload.clone())
                    .map_err(describe)?;
                self.record(outcome);
            }
            Step::Signature { at, name } => {
                let entry = self
                    .session
                    .signatures()
                    .list()
                    .iter()
                    .find(|entry| &entry.name == name)
                    .cloned()
                    .ok_or_else(|| format!("unknown signature {name:?}"))?;
                self.controller.set_tool(Tool::Signature);
                let outcome = self
                    .controller
                    .place_signature(&mut self.session, point(*at), &entry)
                    .map_err(describe)?;
                self.record(outcome);
            }
            Step::Update { target, patch } => {
                let id = self.target(*target)?;
                self.session.update(id, patch).map_err(describe)?;
            }
            Step::Delete { target } => {
                let id = self.target(*target)?;
                self.session.delete(id).map_err(describe)?;
            }
            Step::DeleteLayer { layer } => {
                self.session.delete_layer(*layer);
            }
            Step::MoveLayer { layer, direction } => {
                self.session.move_layer(*layer, *direction);
            }
            Step::SetVisible { layer, visible } => self.session.set_layer_visible(*layer, *visible),
            Step::Undo => self.session.undo().map_err(describe)?,
            Step::Redo => self.session.redo().map_err(describe)?,
        }
        Ok(())
    }

    fn record(&mut self, outcome: GestureOutcome) {
        match outcome {
            GestureOutcome::Committed(annotation) => self.created.push(annotation.id()),
            GestureOutcome::Discarded => self.discarded += 1,
            GestureOutcome::Ignored | GestureOutcome::Started | GestureOutcome::Selected(_) => {}
        }
    }

    fn target(&self, index: usize) -> Result<AnnotationId, String> {
        self.created
            .get(index)
            .copied()
            .ok_or_else(|| format!("target {index} does not name a committed annotation"))
    }
}

fn point([x, y]: [f32; 2]) -> PageCoordinate {
    PageCoordinate::new(x, y)
}

fn describe(error: AnnotationError) -> String {
    error.to_string()
}
