//! Render projection
//!
//! Maps the annotations of one page at one zoom level to an ordered list of
//! draw primitives. Projection is pure: it borrows the annotation set, the
//! layer visibility flags and the raster cache state, and never mutates any
//! of them. The same inputs always produce the same output.

use crate::annotation::{Annotation, AnnotationId, AnnotationKind, Color, Payload, RasterKey};
use crate::config::EditorConfig;
use crate::layers::LayerVisibility;
use serde::Serialize;
use std::f32::consts::FRAC_PI_6;

/// Axis-aligned rectangle in device units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Backend-neutral drawing primitive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "primitive", rename_all = "snake_case")]
pub enum Primitive {
    /// Text anchored at its top-left origin
    GlyphRun {
        origin: [f32; 2],
        text: String,
        font_size: f32,
        color: Color,
    },
    /// Rectangle with optional fill and stroke
    Rect {
        rect: Rect,
        fill: Option<Color>,
        stroke: Option<Color>,
        stroke_width: f32,
    },
    /// Stroked circle
    Ellipse {
        center: [f32; 2],
        radius: f32,
        stroke: Color,
        stroke_width: f32,
    },
    Line {
        start: [f32; 2],
        end: [f32; 2],
        color: Color,
        width: f32,
    },
    /// Decoded raster scaled into `dest`
    ImageBlit {
        dest: Rect,
        raster: RasterKey,
        pixel_width: u32,
        pixel_height: u32,
    },
}

/// A primitive tagged with the annotation it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawPrimitive {
    pub annotation_id: AnnotationId,
    pub layer: u32,
    #[serde(flatten)]
    pub primitive: Primitive,
}

/// Output of one projection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projection {
    /// Paint order, back to front
    pub primitives: Vec<DrawPrimitive>,

    /// Raster annotations skipped because their decode has not finished
    pub deferred: Vec<AnnotationId>,
}

/// Decode state of a raster payload as seen by the projector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterState {
    Pending,
    Ready { width: u32, height: u32 },
    Failed,
}

/// Read-only view of decoded rasters
pub trait RasterSource {
    fn raster_state(&self, key: RasterKey) -> RasterState;
}

/// Every raster is ready at a nominal size; used where decode is irrelevant
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeDecoded;

impl RasterSource for AssumeDecoded {
    fn raster_state(&self, _key: RasterKey) -> RasterState {
        RasterState::Ready { width: 1, height: 1 }
    }
}

/// Base stroke width at zoom 1.0
const STROKE_WIDTH: f32 = 2.0;

/// Styling constants applied while projecting
#[derive(Debug, Clone, PartialEq)]
pub struct Projector {
    shape_color: Color,
    text_color: Color,
    highlight_color: Color,
    placeholder_color: Color,
    arrowhead_length: f32,
    default_font_size: f32,
}

impl Default for Projector {
    fn default() -> Self {
        Self::from_config(&EditorConfig::default())
    }
}

impl Projector {
    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            shape_color: Color::RED,
            text_color: Color::BLACK,
            highlight_color: config.highlight_color,
            placeholder_color: Color::GREY,
            arrowhead_length: config.arrowhead_length,
            default_font_size: config.default_font_size,
        }
    }

    /// Project the visible annotations of `page` at `zoom`
    pub fn project<'a, I>(
        &self,
        page: u32,
        zoom: f32,
        annotations: I,
        visibility: &LayerVisibility,
        rasters: &dyn RasterSource,
    ) -> Projection
    where
        I: IntoIterator<Item = &'a Annotation>,
    {
        let mut visible: Vec<&Annotation> = annotations
            .into_iter()
            .filter(|annotation| annotation.page() == page)
            .filter(|annotation| visibility.is_visible(annotation.layer()))
            .collect();
        // Stable: ties keep insertion order
        visible.sort_by_key(|annotation| annotation.layer());

        let mut projection = Projection::default();
        for annotation in visible {
            self.emit(annotation, zoom, rasters, &mut projection);
        }
        projection
    }

    fn emit(&self, annotation: &Annotation, zoom: f32, rasters: &dyn RasterSource, out: &mut Projection) {
        let origin = annotation.geometry().origin;
        let (x, y) = (origin.x * zoom, origin.y * zoom);
        let (w, h) = annotation
            .geometry()
            .size
            .map_or((0.0, 0.0), |size| (size.width * zoom, size.height * zoom));
        let color = annotation.style().color;
        let stroke_width = STROKE_WIDTH * zoom;

        let Projection { primitives, deferred } = out;
        let mut push = |primitive: Primitive| {
            primitives.push(DrawPrimitive {
                annotation_id: annotation.id(),
                layer: annotation.layer(),
                primitive,
            });
        };

        match annotation.kind() {
            AnnotationKind::Text => {
                let text = annotation.text().unwrap_or_default().to_string();
                let font_size = annotation.style().font_size.unwrap_or(self.default_font_size);
                push(Primitive::GlyphRun {
                    origin: [x, y],
                    text,
                    font_size: font_size * zoom,
                    color: color.unwrap_or(self.text_color),
                });
            }
            AnnotationKind::Rectangle => push(Primitive::Rect {
                rect: Rect::new(x, y, w, h),
                fill: None,
                stroke: Some(color.unwrap_or(self.shape_color)),
                stroke_width,
            }),
            AnnotationKind::Highlight => push(Primitive::Rect {
                rect: Rect::new(x, y, w, h),
                fill: Some(color.unwrap_or(self.highlight_color)),
                stroke: None,
                stroke_width: 0.0,
            }),
            AnnotationKind::Circle => push(Primitive::Ellipse {
                center: [x + w / 2.0, y + h / 2.0],
                radius: w.min(h) / 2.0,
                stroke: color.unwrap_or(self.shape_color),
                stroke_width,
            }),
            AnnotationKind::Arrow => {
                let color = color.unwrap_or(self.shape_color);
                let start = [x, y];
                let end = [x + w, y + h];
                push(Primitive::Line { start, end, color, width: stroke_width });

                let angle = (end[1] - start[1]).atan2(end[0] - start[0]);
                let length = self.arrowhead_length * zoom;
                for leg in [angle - FRAC_PI_6, angle + FRAC_PI_6] {
                    push(Primitive::Line {
                        start: end,
                        end: [end[0] - length * leg.cos(), end[1] - length * leg.sin()],
                        color,
                        width: stroke_width,
                    });
                }
            }
            AnnotationKind::Image | AnnotationKind::Signature => {
                let Payload::Raster(raster) = annotation.payload() else {
                    return;
                };
                let dest = Rect::new(x, y, w, h);
                match rasters.raster_state(raster.key()) {
                    RasterState::Ready { width, height } => push(Primitive::ImageBlit {
                        dest,
                        raster: raster.key(),
                        pixel_width: width,
                        pixel_height: height,
                    }),
                    RasterState::Failed => push(Primitive::Rect {
                        rect: dest,
                        fill: None,
                        stroke: Some(self.placeholder_color),
                        stroke_width,
                    }),
                    RasterState::Pending => deferred.push(annotation.id()),
                }
            }
        }
    }
}
