//! Document source abstraction
//!
//! The editor never looks inside page content. It only needs to know how
//! many pages exist and how large each one is so it can validate commits and
//! size the backdrop of a frame.

use serde::{Deserialize, Serialize};

/// Page dimensions in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self { width_pt, height_pt }
    }

    /// US Letter
    pub const LETTER: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };

    /// A4
    pub const A4: PageSize = PageSize { width_pt: 595.0, height_pt: 842.0 };
}

impl Default for PageSize {
    fn default() -> Self {
        Self::LETTER
    }
}

/// Source of page geometry for an editing session
pub trait DocumentSource: Send {
    fn page_count(&self) -> u32;

    /// Size of a 1-based page, `None` when out of range
    fn page_size(&self, page: u32) -> Option<PageSize>;

    fn contains(&self, page: u32) -> bool {
        page >= 1 && page <= self.page_count()
    }
}

/// Blank pages of one nominal size, standing in for real page content
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderDocument {
    page_count: u32,
    page_size: PageSize,
}

impl PlaceholderDocument {
    pub fn new(page_count: u32) -> Self {
        Self { page_count, page_size: PageSize::default() }
    }

    pub fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for PlaceholderDocument {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DocumentSource for PlaceholderDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self, page: u32) -> Option<PageSize> {
        self.contains(page).then_some(self.page_size)
    }
}
