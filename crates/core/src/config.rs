//! Editor configuration
//!
//! Defaults can be overridden programmatically with the `with_*` builders,
//! from `ANNOTATOR_*` environment variables, or from a TOML file.

use crate::annotation::{Color, Size, DEFAULT_FONT_SIZE};
use crate::store::DEFAULT_DRAG_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const ENV_DRAG_THRESHOLD: &str = "ANNOTATOR_DRAG_THRESHOLD";
pub const ENV_HISTORY_LIMIT: &str = "ANNOTATOR_HISTORY_LIMIT";
pub const ENV_FONT_SIZE: &str = "ANNOTATOR_FONT_SIZE";

/// Tunable editor behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Minimum width and height, in page units, for a shape to be committed
    pub drag_threshold: f32,

    /// Maximum retained undo snapshots, unbounded when absent
    pub history_limit: Option<usize>,

    pub default_font_size: f32,

    /// Color for new annotations; kind-specific defaults apply when absent
    pub default_color: Option<Color>,

    /// Fill used for highlights without an explicit color
    pub highlight_color: Color,

    /// Arrowhead leg length at zoom 1.0
    pub arrowhead_length: f32,

    /// Slop around annotations for select hit-testing
    pub hit_tolerance: f32,

    /// Size given to images and signatures placed with a single click
    pub placed_raster_size: Size,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            drag_threshold: DEFAULT_DRAG_THRESHOLD,
            history_limit: None,
            default_font_size: DEFAULT_FONT_SIZE,
            default_color: None,
            highlight_color: Color::new(255, 255, 0, 128),
            arrowhead_length: 10.0,
            hit_tolerance: 4.0,
            placed_raster_size: Size::new(150.0, 60.0),
        }
    }
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drag_threshold(mut self, threshold: f32) -> Self {
        self.drag_threshold = threshold;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn with_default_font_size(mut self, font_size: f32) -> Self {
        self.default_font_size = font_size;
        self
    }

    pub fn with_default_color(mut self, color: Color) -> Self {
        self.default_color = Some(color);
        self
    }

    pub fn with_highlight_color(mut self, color: Color) -> Self {
        self.highlight_color = color;
        self
    }

    pub fn with_arrowhead_length(mut self, length: f32) -> Self {
        self.arrowhead_length = length;
        self
    }

    pub fn with_placed_raster_size(mut self, size: Size) -> Self {
        self.placed_raster_size = size;
        self
    }

    pub fn with_hit_tolerance(mut self, tolerance: f32) -> Self {
        self.hit_tolerance = tolerance;
        self
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ANNOTATOR_DRAG_THRESHOLD`: minimum shape extent (default: 5)
    /// - `ANNOTATOR_HISTORY_LIMIT`: maximum undo snapshots (default: unbounded)
    /// - `ANNOTATOR_FONT_SIZE`: default text size (default: 16)
    ///
    /// # Errors
    /// Returns an error if any variable holds an unparsable or out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`EditorConfig::from_env`] with an injectable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DRAG_THRESHOLD) {
            config.drag_threshold = parse_var(ENV_DRAG_THRESHOLD, &value)?;
        }
        if let Some(value) = lookup(ENV_HISTORY_LIMIT) {
            config.history_limit = Some(parse_var(ENV_HISTORY_LIMIT, &value)?);
        }
        if let Some(value) = lookup(ENV_FONT_SIZE) {
            config.default_font_size = parse_var(ENV_FONT_SIZE, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// Missing keys keep their defaults:
    /// ```toml
    /// drag_threshold = 5.0
    /// history_limit = 200
    /// highlight_color = "#ffff0080"
    ///
    /// [placed_raster_size]
    /// width = 150.0
    /// height = 60.0
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Reject values the editor cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.drag_threshold.is_finite() && self.drag_threshold >= 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "drag_threshold must be non-negative, got {}",
                self.drag_threshold
            )));
        }
        if self.history_limit == Some(0) {
            return Err(ConfigError::InvalidValue("history_limit must be at least 1".to_string()));
        }
        if !(self.default_font_size.is_finite() && self.default_font_size > 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "default_font_size must be positive, got {}",
                self.default_font_size
            )));
        }
        if !(self.arrowhead_length.is_finite() && self.arrowhead_length >= 0.0) {
            return Err(ConfigError::InvalidValue("arrowhead_length must be non-negative".to_string()));
        }
        if !(self.hit_tolerance.is_finite() && self.hit_tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue("hit_tolerance must be non-negative".to_string()));
        }
        let size = self.placed_raster_size;
        if size.is_below(self.drag_threshold) || !(size.width.is_finite() && size.height.is_finite()) {
            return Err(ConfigError::InvalidValue(format!(
                "placed_raster_size {}x{} is below the drag threshold",
                size.width, size.height
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name}={value}")))
}

/// Errors that can occur while loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}
