//! Annotation data model
//!
//! Annotations are typed markup elements anchored to a document page.
//! All coordinates are stored in page-local units at 100% zoom; zoom is
//! applied only when annotations are projected into draw primitives.

use crate::error::{AnnotationError, AnnotationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Unique identifier for an annotation
///
/// Assigned by the store at commit time and never changed afterwards.
pub type AnnotationId = uuid::Uuid;

/// Font size used for text annotations that do not carry one
pub const DEFAULT_FONT_SIZE: f32 = 16.0;

/// Page-local coordinate
///
/// Origin at the top-left of the page, X to the right, Y downward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageCoordinate {
    pub x: f32,
    pub y: f32,
}

impl PageCoordinate {
    /// Create a new page coordinate
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another coordinate
    pub fn distance_to(&self, other: &PageCoordinate) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Width and height of a shape in page units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// True when either axis is smaller than `threshold`
    pub fn is_below(&self, threshold: f32) -> bool {
        self.width < threshold || self.height < threshold
    }
}

/// RGBA color, serialized as `#rrggbb` or `#rrggbbaa`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Create a new color
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Same color with a different alpha
    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Convert to normalized RGBA values (0.0 to 1.0)
    pub fn to_normalized(&self) -> (f32, f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        )
    }

    /// Hex form; the alpha pair is omitted for opaque colors
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 255, b: 0, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const GREY: Color = Color { r: 128, g: 128, b: 128, a: 255 };
}

/// Error returned when a color string is not `#rrggbb` or `#rrggbbaa`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color: {0:?}")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(ParseColorError(s.to_string()));
        }

        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ParseColorError(s.to_string()))
        };

        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Color::new(channel(0)?, channel(2)?, channel(4)?, a))
    }
}

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Closed set of annotation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Text,
    Rectangle,
    Circle,
    Highlight,
    Arrow,
    Image,
    Signature,
}

impl AnnotationKind {
    /// Kinds created by dragging out a rectangle
    pub fn is_drawable(self) -> bool {
        matches!(
            self,
            AnnotationKind::Rectangle
                | AnnotationKind::Circle
                | AnnotationKind::Highlight
                | AnnotationKind::Arrow
        )
    }

    /// Kinds that carry a raster payload
    pub fn is_raster(self) -> bool {
        matches!(self, AnnotationKind::Image | AnnotationKind::Signature)
    }

    /// Every kind except text carries a width and height
    pub fn has_size(self) -> bool {
        self != AnnotationKind::Text
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Text => "text",
            AnnotationKind::Rectangle => "rectangle",
            AnnotationKind::Circle => "circle",
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Arrow => "arrow",
            AnnotationKind::Image => "image",
            AnnotationKind::Signature => "signature",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin plus optional size
///
/// Text annotations are anchored at a point and never carry a size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub origin: PageCoordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
}

impl Geometry {
    /// Point geometry (text)
    pub fn point(origin: PageCoordinate) -> Self {
        Self { origin, size: None }
    }

    /// Rectangular geometry (every other kind)
    pub fn rect(origin: PageCoordinate, size: Size) -> Self {
        Self { origin, size: Some(size) }
    }

    /// End point of the diagonal, `(x + w, y + h)`
    pub fn far_corner(&self) -> PageCoordinate {
        let size = self.size.unwrap_or(Size::new(0.0, 0.0));
        PageCoordinate::new(self.origin.x + size.width, self.origin.y + size.height)
    }
}

/// Visual styling
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,

    /// Font size for text annotations (page units)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
}

/// Stable cache key for a raster payload, derived from its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RasterKey(pub u64);

/// Encoded raster image (PNG, JPEG) carried by image and signature annotations
///
/// The bytes are opaque to the model; decoding happens in [`crate::decode`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterPayload {
    pub mime: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl RasterPayload {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { mime: mime.into(), bytes }
    }

    /// PNG payload
    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new("image/png", bytes)
    }

    /// Content-derived key; identical payloads share one decode
    pub fn key(&self) -> RasterKey {
        let mut hasher = DefaultHasher::new();
        self.mime.hash(&mut hasher);
        self.bytes.hash(&mut hasher);
        RasterKey(hasher.finish())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for RasterPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterPayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Base64 encoding for raster bytes; accepts `data:` URLs on input
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let data = match encoded.strip_prefix("data:") {
            Some(url) => url.split_once(',').map(|(_, data)| data).unwrap_or_default(),
            None => encoded.as_str(),
        };
        STANDARD.decode(data.trim()).map_err(serde::de::Error::custom)
    }
}

/// Kind-specific content
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Shapes carry no payload
    #[default]
    None,
    Text(String),
    Raster(RasterPayload),
}

/// Check the kind/geometry/style/payload pairing shared by drafts and annotations
fn check_consistency(
    kind: AnnotationKind,
    page: u32,
    geometry: &Geometry,
    style: &AnnotationStyle,
    payload: &Payload,
) -> AnnotationResult<()> {
    if page == 0 {
        return Err(AnnotationError::InvalidDraft("pages are numbered from 1".to_string()));
    }

    if !geometry.origin.is_finite() {
        return Err(AnnotationError::InvalidDraft("origin is not finite".to_string()));
    }

    match (kind.has_size(), geometry.size) {
        (false, Some(_)) => {
            return Err(AnnotationError::InvalidDraft(
                "text annotations do not carry a size".to_string(),
            ));
        }
        (true, None) => {
            return Err(AnnotationError::InvalidDraft(format!("{kind} annotations need a size")));
        }
        (true, Some(size)) => {
            if !(size.width.is_finite() && size.height.is_finite())
                || size.width < 0.0
                || size.height < 0.0
            {
                return Err(AnnotationError::InvalidDraft(format!(
                    "size must be finite and non-negative, got {}x{}",
                    size.width, size.height
                )));
            }
        }
        (false, None) => {}
    }

    if let Some(font_size) = style.font_size {
        if kind != AnnotationKind::Text {
            return Err(AnnotationError::InvalidDraft(format!(
                "{kind} annotations do not carry a font size"
            )));
        }
        if !(font_size.is_finite() && font_size > 0.0) {
            return Err(AnnotationError::InvalidDraft(format!(
                "font size must be positive, got {font_size}"
            )));
        }
    }

    let payload_ok = match payload {
        Payload::None => !kind.is_raster() && kind != AnnotationKind::Text,
        Payload::Text(_) => kind == AnnotationKind::Text,
        Payload::Raster(_) => kind.is_raster(),
    };
    if !payload_ok {
        return Err(AnnotationError::InvalidDraft(format!(
            "payload does not match {kind} annotation"
        )));
    }

    Ok(())
}

/// An uncommitted annotation produced by a gesture or a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDraft {
    pub kind: AnnotationKind,
    pub page: u32,
    #[serde(default)]
    pub layer: u32,
    pub geometry: Geometry,
    #[serde(default)]
    pub style: AnnotationStyle,
    #[serde(default)]
    pub payload: Payload,
}

impl AnnotationDraft {
    /// Draft for a payload-less shape (rectangle, circle, highlight, arrow)
    pub fn shape(kind: AnnotationKind, page: u32, origin: PageCoordinate, size: Size) -> Self {
        Self {
            kind,
            page,
            layer: 0,
            geometry: Geometry::rect(origin, size),
            style: AnnotationStyle::default(),
            payload: Payload::None,
        }
    }

    /// Draft for a text annotation anchored at `origin`
    pub fn text(page: u32, origin: PageCoordinate, text: impl Into<String>) -> Self {
        Self {
            kind: AnnotationKind::Text,
            page,
            layer: 0,
            geometry: Geometry::point(origin),
            style: AnnotationStyle::default(),
            payload: Payload::Text(text.into()),
        }
    }

    /// Draft for an image or signature annotation
    pub fn raster(
        kind: AnnotationKind,
        page: u32,
        origin: PageCoordinate,
        size: Size,
        payload: RasterPayload,
    ) -> Self {
        Self {
            kind,
            page,
            layer: 0,
            geometry: Geometry::rect(origin, size),
            style: AnnotationStyle::default(),
            payload: Payload::Raster(payload),
        }
    }

    pub fn on_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.style.color = Some(color);
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.style.font_size = Some(font_size);
        self
    }

    /// Structural validation; the drag threshold is checked by the store
    pub fn validate(&self) -> AnnotationResult<()> {
        check_consistency(self.kind, self.page, &self.geometry, &self.style, &self.payload)
    }
}

/// Partial update applied by [`crate::store::AnnotationStore::update`]
///
/// Unset fields keep their current value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationPatch {
    pub page: Option<u32>,
    pub layer: Option<u32>,
    pub origin: Option<PageCoordinate>,
    pub size: Option<Size>,
    pub color: Option<Color>,
    pub font_size: Option<f32>,
    pub text: Option<String>,
    pub raster: Option<RasterPayload>,
}

impl AnnotationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn with_origin(mut self, origin: PageCoordinate) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = Some(font_size);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_raster(mut self, raster: RasterPayload) -> Self {
        self.raster = Some(raster);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A committed annotation
///
/// Only the store creates and mutates annotations, so `id` is stable and
/// every instance satisfies the kind/geometry/payload pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    id: AnnotationId,
    kind: AnnotationKind,
    page: u32,
    layer: u32,
    geometry: Geometry,
    #[serde(default)]
    style: AnnotationStyle,
    #[serde(default)]
    payload: Payload,
    created_at: DateTime<Utc>,
}

impl Annotation {
    pub(crate) fn from_draft(draft: AnnotationDraft, id: AnnotationId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: draft.kind,
            page: draft.page,
            layer: draft.layer,
            geometry: draft.geometry,
            style: draft.style,
            payload: draft.payload,
            created_at,
        }
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn kind(&self) -> AnnotationKind {
        self.kind
    }

    /// 1-based page number
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Paint-order key (higher = on top)
    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Literal string of a text annotation
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Raster payload of an image or signature annotation
    pub fn raster(&self) -> Option<&RasterPayload> {
        match &self.payload {
            Payload::Raster(raster) => Some(raster),
            _ => None,
        }
    }

    pub fn font_size(&self) -> f32 {
        self.style.font_size.unwrap_or(DEFAULT_FONT_SIZE)
    }

    pub(crate) fn set_layer(&mut self, layer: u32) {
        self.layer = layer;
    }

    /// Re-check the structural invariants (used for records loaded from disk)
    pub fn validate(&self) -> AnnotationResult<()> {
        check_consistency(self.kind, self.page, &self.geometry, &self.style, &self.payload)
    }

    /// Copy with `patch` merged in; `id`, `kind` and `created_at` are kept
    pub(crate) fn patched(&self, patch: &AnnotationPatch) -> AnnotationResult<Annotation> {
        let mut next = self.clone();

        if let Some(page) = patch.page {
            next.page = page;
        }
        if let Some(layer) = patch.layer {
            next.layer = layer;
        }
        if let Some(origin) = patch.origin {
            next.geometry.origin = origin;
        }
        if let Some(size) = patch.size {
            next.geometry.size = Some(size);
        }
        if let Some(color) = patch.color {
            next.style.color = Some(color);
        }
        if let Some(font_size) = patch.font_size {
            next.style.font_size = Some(font_size);
        }
        if let Some(text) = &patch.text {
            next.payload = Payload::Text(text.clone());
        }
        if let Some(raster) = &patch.raster {
            next.payload = Payload::Raster(raster.clone());
        }

        next.validate()?;
        Ok(next)
    }

    /// Bounding box as (min_x, min_y, max_x, max_y) in page coordinates
    ///
    /// Text extent is estimated from the font size; actual glyph metrics
    /// belong to the renderer.
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        let origin = self.geometry.origin;
        match self.geometry.size {
            Some(size) => (origin.x, origin.y, origin.x + size.width, origin.y + size.height),
            None => {
                let font_size = self.font_size();
                let chars = self.text().map_or(0, |text| text.chars().count()) as f32;
                (origin.x, origin.y, origin.x + chars * font_size * 0.6, origin.y + font_size)
            }
        }
    }

    /// Check if a point hits this annotation (for selection)
    pub fn hit_test(&self, point: &PageCoordinate, tolerance: f32) -> bool {
        if self.kind == AnnotationKind::Arrow {
            let end = self.geometry.far_corner();
            return point_near_line_segment(point, &self.geometry.origin, &end, tolerance);
        }

        let (min_x, min_y, max_x, max_y) = self.bounding_box();
        point.x >= min_x - tolerance
            && point.x <= max_x + tolerance
            && point.y >= min_y - tolerance
            && point.y <= max_y + tolerance
    }
}

fn point_near_line_segment(
    point: &PageCoordinate,
    start: &PageCoordinate,
    end: &PageCoordinate,
    tolerance: f32,
) -> bool {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;

    if length_sq < 1e-6 {
        return point.distance_to(start) <= tolerance;
    }

    let t = (((point.x - start.x) * dx + (point.y - start.y) * dy) / length_sq).clamp(0.0, 1.0);
    let closest = PageCoordinate::new(start.x + t * dx, start.y + t * dy);
    point.distance_to(&closest) <= tolerance
}
