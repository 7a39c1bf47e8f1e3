//! Split renderer - the public engine entry point
//!
//! `render_section` resolves the page, then either claims an idle main
//! surface whole ("main user"), extracts a secondary copy from a busy one,
//! or creates and renders a fresh main surface. Callers get the raster
//! plus a reference token they must release exactly once.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLockReadGuard, Weak};

use fast_image_resize as fir;
use flume::Sender;

use crate::cache::PageCache;
use crate::config::EngineConfig;
use crate::error::RenderError;
use crate::raster::{PageInfo, RasterFault, Rasterizer, TextLine};
use crate::refcount::{ReferenceManager, SurfaceReference};
use crate::registry::{Acquired, MainSurface, SurfaceRegistry};
use crate::request::{Latch, RenderJob};
use crate::surface::RasterSurface;
use crate::worker::render_worker;

/// Result of a section render: the raster, whether it is a whole-page main
/// surface (the caller crops visually itself), and the reference the
/// caller must release when the output is no longer displayed.
pub struct SectionRender {
    pub surface: SectionSurface,
    pub is_main: bool,
    pub reference: SurfaceReference,
}

enum SectionKind {
    Main(Arc<MainSurface>),
    Secondary(Arc<RasterSurface>),
}

/// A rendered raster handed to a consumer. Main surfaces contain the whole
/// page; secondary surfaces contain exactly the requested slice.
pub struct SectionSurface {
    kind: SectionKind,
}

impl SectionSurface {
    #[must_use]
    pub fn is_main(&self) -> bool {
        matches!(self.kind, SectionKind::Main(_))
    }

    /// Render scale of the backing main surface, if this is one. May be
    /// larger than the requested scale.
    #[must_use]
    pub fn main_scale(&self) -> Option<f32> {
        match &self.kind {
            SectionKind::Main(surface) => Some(surface.scale),
            SectionKind::Secondary(_) => None,
        }
    }

    /// Borrow the pixel data. Cheap; no copy.
    #[must_use]
    pub fn pixels(&self) -> SectionPixels<'_> {
        match &self.kind {
            SectionKind::Main(surface) => SectionPixels(PixelsRepr::Main(
                surface
                    .pixels
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
            )),
            SectionKind::Secondary(surface) => {
                SectionPixels(PixelsRepr::Secondary(surface))
            }
        }
    }
}

enum PixelsRepr<'a> {
    Main(RwLockReadGuard<'a, RasterSurface>),
    Secondary(&'a RasterSurface),
}

/// Read access to a section surface's raster.
pub struct SectionPixels<'a>(PixelsRepr<'a>);

impl Deref for SectionPixels<'_> {
    type Target = RasterSurface;

    fn deref(&self) -> &RasterSurface {
        match &self.0 {
            PixelsRepr::Main(guard) => guard,
            PixelsRepr::Secondary(surface) => surface,
        }
    }
}

struct RendererShared {
    jobs: Sender<RenderJob>,
    cache: PageCache,
    registry: SurfaceRegistry,
    secondaries: Mutex<HashMap<u64, Arc<RasterSurface>>>,
    next_secondary_id: AtomicU64,
    page_count: usize,
}

impl Drop for RendererShared {
    fn drop(&mut self) {
        let _ = self.jobs.send(RenderJob::Shutdown);
    }
}

/// Per-document rendering engine. Cloning shares the same worker, caches
/// and registry; dropping the last handle shuts the worker down and drops
/// every cache and surface with it.
#[derive(Clone)]
pub struct SplitRenderer {
    shared: Arc<RendererShared>,
}

impl SplitRenderer {
    /// Build an engine over a backend with the default configuration. The
    /// factory runs on the worker thread, so backend types never cross
    /// threads.
    pub fn with_backend<F>(factory: F) -> Result<Self, RenderError>
    where
        F: FnOnce() -> Result<Box<dyn Rasterizer>, RasterFault> + Send + 'static,
    {
        Self::with_config(factory, EngineConfig::default())
    }

    pub fn with_config<F>(factory: F, config: EngineConfig) -> Result<Self, RenderError>
    where
        F: FnOnce() -> Result<Box<dyn Rasterizer>, RasterFault> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = flume::unbounded();
        let info: Arc<Latch<usize>> = Arc::new(Latch::new());

        let gate = info.clone();
        std::thread::spawn(move || render_worker(factory, &gate, &jobs_rx));

        let page_count = info.wait()?;
        log::info!("document opened with {page_count} pages");

        Ok(Self {
            shared: Arc::new(RendererShared {
                jobs: jobs_tx,
                cache: PageCache::new(),
                registry: SurfaceRegistry::new(config),
                secondaries: Mutex::new(HashMap::new()),
                next_secondary_id: AtomicU64::new(1),
                page_count,
            }),
        })
    }

    /// Open a PDF document with the mupdf backend.
    #[cfg(feature = "pdf")]
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, RenderError> {
        let path = path.into();
        Self::with_backend(move || {
            crate::mupdf_backend::MupdfRasterizer::open(&path)
                .map(|backend| Box::new(backend) as Box<dyn Rasterizer>)
        })
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.shared.page_count
    }

    /// Natural page dimensions at scale 1.0.
    pub fn page_size(&self, page_number: usize) -> Result<(f32, f32), RenderError> {
        let page = self.resolve_page(page_number)?;
        Ok((page.width, page.height))
    }

    /// Text layout of a page, memoized for the document's lifetime.
    pub fn page_text(&self, page_number: usize) -> Result<Arc<Vec<TextLine>>, RenderError> {
        let page = self.resolve_page(page_number)?;
        let jobs = self.shared.jobs.clone();
        self.shared.cache.resolve_text(page_number, move |slot| {
            jobs.send(RenderJob::ResolveText { page, slot })
                .map_err(|_| RenderError::Disconnected)
        })
    }

    /// Render the vertical interval `[start, end)` of a page using at
    /// least `scale`.
    ///
    /// The returned surface is either a whole main surface (`is_main`,
    /// the caller aligns and crops visually) or a secondary copy sized
    /// exactly to the section. Resolves only once the surface contains
    /// valid pixels; on failure no surface and no reference is produced.
    pub fn render_section(
        &self,
        page_number: usize,
        scale: f32,
        start: f32,
        end: f32,
    ) -> Result<SectionRender, RenderError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RenderError::InvalidScale { scale });
        }
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end > 1.0 || start >= end {
            return Err(RenderError::InvalidSection { start, end });
        }

        let page = self.resolve_page(page_number)?;
        let (width, height) = page.viewport(scale);

        match self
            .shared
            .registry
            .acquire_or_create(page_number, scale, width, height)
        {
            Acquired::Main { surface, reference } => self.finish_main(surface, reference),

            Acquired::Busy { surface, hold } => {
                self.extract_secondary(&page, scale, start, end, &surface, hold)
            }

            Acquired::Created {
                surface,
                reference,
                hold,
            } => {
                let job = RenderJob::RenderMain {
                    page,
                    scale,
                    surface: surface.clone(),
                    hold,
                };
                if let Err(send_err) = self.shared.jobs.send(job) {
                    self.shared.registry.discard(page_number, surface.id);
                    if let RenderJob::RenderMain { hold, .. } = send_err.into_inner() {
                        let _ = hold.release();
                    }
                    let _ = reference.release();
                    return Err(RenderError::Disconnected);
                }
                self.finish_main(surface, reference)
            }
        }
    }

    fn resolve_page(&self, page_number: usize) -> Result<PageInfo, RenderError> {
        let jobs = self.shared.jobs.clone();
        self.shared.cache.resolve_page(page_number, move |slot| {
            jobs.send(RenderJob::ResolvePage {
                number: page_number,
                slot,
            })
            .map_err(|_| RenderError::Disconnected)
        })
    }

    /// Main-user path: wait for valid pixels and hand the whole surface
    /// out. A failed render discards the surface so a later request can
    /// retry from scratch.
    fn finish_main(
        &self,
        surface: Arc<MainSurface>,
        reference: SurfaceReference,
    ) -> Result<SectionRender, RenderError> {
        if let Err(err) = surface.rendered.wait() {
            self.shared
                .registry
                .discard(surface.page_number, surface.id);
            let _ = reference.release();
            return Err(err);
        }
        Ok(SectionRender {
            surface: SectionSurface {
                kind: SectionKind::Main(surface),
            },
            is_main: true,
            reference,
        })
    }

    /// Extraction path: wait for the main surface's render, copy the
    /// section rectangle out (resizing when the main surface was rendered
    /// at a larger scale), release the temporary hold, and wrap the copy
    /// in a fresh reference manager.
    fn extract_secondary(
        &self,
        page: &PageInfo,
        scale: f32,
        start: f32,
        end: f32,
        main: &Arc<MainSurface>,
        hold: SurfaceReference,
    ) -> Result<SectionRender, RenderError> {
        if let Err(err) = main.rendered.wait() {
            self.shared.registry.discard(main.page_number, main.id);
            let _ = hold.release();
            return Err(err);
        }

        let (target_width, _) = page.viewport(scale);
        let target_height = (page.height * scale * (end - start)).round() as u32;

        let copy = {
            let pixels = main
                .pixels
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let src_height = pixels.height() as f32;
            let sy = (src_height * start) as u32;
            let rows = (src_height * (end - start)) as u32;
            pixels.vertical_slice(sy, rows)
        };
        // the copy is complete; the main surface may now idle toward
        // eviction independently of this secondary
        if let Err(err) = hold.release() {
            log::error!("temporary main-surface hold release failed: {err}");
        }

        let section = if copy.width() == target_width && copy.height() == target_height {
            copy
        } else {
            resize_to(&copy, target_width, target_height, page.number, scale)?
        };

        let id = self.shared.next_secondary_id.fetch_add(1, Ordering::Relaxed);
        let section = Arc::new(section);
        self.lock_secondaries().insert(id, section.clone());

        let manager = ReferenceManager::new();
        let weak: Weak<RendererShared> = Arc::downgrade(&self.shared);
        manager.add_listener(move |count| {
            if count == 0 {
                if let Some(shared) = weak.upgrade() {
                    shared
                        .secondaries
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(&id);
                    log::debug!("secondary surface {id} destroyed");
                }
            }
        });
        let reference = manager.retain();

        Ok(SectionRender {
            surface: SectionSurface {
                kind: SectionKind::Secondary(section),
            },
            is_main: false,
            reference,
        })
    }

    /// Number of secondary surfaces the engine still tracks.
    #[must_use]
    pub fn live_secondary_count(&self) -> usize {
        self.lock_secondaries().len()
    }

    fn lock_secondaries(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<RasterSurface>>> {
        self.shared
            .secondaries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Scale a cropped slice down to the requested section dimensions.
fn resize_to(
    src: &RasterSurface,
    width: u32,
    height: u32,
    page: usize,
    scale: f32,
) -> Result<RasterSurface, RenderError> {
    use std::num::NonZeroU32;

    if width == 0 || height == 0 || src.width() == 0 || src.height() == 0 {
        return Ok(RasterSurface::new(width, height));
    }

    let nz = |v: u32| {
        NonZeroU32::new(v).ok_or(RenderError::RenderFailure {
            page,
            scale,
            detail: "zero-sized resize".into(),
        })
    };

    let src_img = fir::Image::from_vec_u8(
        nz(src.width())?,
        nz(src.height())?,
        src.as_bytes().to_vec(),
        fir::PixelType::U8x4,
    )
    .map_err(|e| RenderError::RenderFailure {
        page,
        scale,
        detail: format!("resize source: {e}"),
    })?;
    let mut dst = fir::Image::new(nz(width)?, nz(height)?, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear));
    resizer
        .resize(&src_img.view(), &mut dst.view_mut())
        .map_err(|e| RenderError::RenderFailure {
            page,
            scale,
            detail: format!("resize: {e}"),
        })?;

    let mut out = RasterSurface::new(width, height);
    out.as_bytes_mut().copy_from_slice(&dst.into_vec());
    Ok(out)
}
