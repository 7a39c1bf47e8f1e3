//! Split rendering and cut detection for paginated documents.
//!
//! A [`SplitRenderer`] serves vertical page sections from shared full-page
//! "main" surfaces: an idle main surface is handed out whole, a busy one
//! donates a cropped (and if needed resized) secondary copy, and surfaces
//! whose reference count stays at zero for a grace period are evicted.
//! [`determine_optimal_cut_positions`] scans a rendered surface for clean
//! horizontal bands and proposes snap points for section boundaries.

mod cache;
pub mod config;
pub mod error;
pub mod raster;
pub mod refcount;
mod registry;
pub mod renderer;
mod request;
pub mod snap;
pub mod surface;
mod worker;

#[cfg(feature = "pdf")]
pub mod mupdf_backend;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::EngineConfig;
pub use error::{DoubleReleaseError, RenderError};
pub use raster::{PageInfo, RasterFault, Rasterizer, TextLine};
pub use refcount::{ReferenceManager, SurfaceReference};
pub use renderer::{SectionPixels, SectionRender, SectionSurface, SplitRenderer};
pub use snap::{
    determine_optimal_cut_positions, nearest_snap_point, SnapOptions, SnapRegion,
    DEFAULT_SNAP_DISTANCE_RATIO,
};
pub use surface::RasterSurface;
