//! Error taxonomy for the split-rendering engine

/// Errors surfaced by [`crate::SplitRenderer`] operations.
///
/// `Clone` is required because a single failed render may be observed by
/// every caller coalesced onto the same in-flight operation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RenderError {
    /// The document could not be opened at all.
    #[error("failed to open document: {detail}")]
    DocumentOpen { detail: String },

    /// The rasterization backend could not produce a page descriptor.
    /// Not cached; a subsequent request retries.
    #[error("failed to load page {page}: {detail}")]
    PageLoad { page: usize, detail: String },

    /// Rasterization of a main surface failed after the page resolved.
    /// The partial surface is discarded, never registered.
    #[error("failed to render page {page} at scale {scale}: {detail}")]
    RenderFailure {
        page: usize,
        scale: f32,
        detail: String,
    },

    /// `start >= end`, or either bound outside `[0, 1]`. Rejected before
    /// any rendering work is attempted.
    #[error("invalid section [{start}, {end})")]
    InvalidSection { start: f32, end: f32 },

    /// Scale is not a finite positive number.
    #[error("invalid scale {scale}")]
    InvalidScale { scale: f32 },

    /// The render worker has shut down.
    #[error("render worker disconnected")]
    Disconnected,
}

/// A surface reference was released twice, or an unknown token id was
/// released. Indicates reference-count corruption in the caller; never
/// silently decrements the count.
#[derive(Clone, Debug, thiserror::Error)]
#[error("surface reference {id} released twice or unknown")]
pub struct DoubleReleaseError {
    pub id: u64,
}
