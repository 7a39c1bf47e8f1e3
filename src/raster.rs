//! Rasterization backend boundary
//!
//! The engine never decodes page content itself; a [`Rasterizer`] supplies
//! page descriptors and writes full-page renders into caller-provided
//! buffers. The production backend wraps mupdf (feature `pdf`); tests use
//! an in-memory fake.

use crate::surface::RasterSurface;

/// Errors from the rasterization backend.
#[derive(Debug, thiserror::Error)]
pub enum RasterFault {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("{detail}")]
    Generic { detail: String },
}

impl RasterFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Per-page descriptor: natural dimensions at scale 1.0.
///
/// Created lazily on first access and cached for the document's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct PageInfo {
    /// Page number (0-indexed).
    pub number: usize,
    /// Natural width at scale 1.0.
    pub width: f32,
    /// Natural height at scale 1.0.
    pub height: f32,
}

impl PageInfo {
    /// Pixel dimensions of the page viewport at the given scale.
    #[must_use]
    pub fn viewport(&self, scale: f32) -> (u32, u32) {
        (
            (self.width * scale).round().max(1.0) as u32,
            (self.height * scale).round().max(1.0) as u32,
        )
    }
}

/// One text line of a page with its bounding box in natural (scale 1.0)
/// page coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct TextLine {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub text: String,
}

/// The external page-rasterization primitive.
///
/// All methods run on the render worker thread that owns the backend, so
/// implementations are never re-entered and need no internal locking.
pub trait Rasterizer {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Resolve the descriptor for a page. May fail for corrupt or missing
    /// pages.
    fn load_page(&mut self, number: usize) -> Result<PageInfo, RasterFault>;

    /// Render the full page at `scale` into `target`. The implementation
    /// sizes `target` to the rasterized output.
    fn render_page(
        &mut self,
        page: &PageInfo,
        scale: f32,
        target: &mut RasterSurface,
    ) -> Result<(), RasterFault>;

    /// Extract the text layout of a page in natural page coordinates.
    fn page_text(&mut self, page: &PageInfo) -> Result<Vec<TextLine>, RasterFault> {
        let _ = page;
        Ok(Vec::new())
    }
}
