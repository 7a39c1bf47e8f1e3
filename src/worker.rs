//! Render worker - owns the rasterization backend on a dedicated thread
//!
//! Jobs are processed strictly in order, so the backend is never
//! re-entered and at most one render is in flight at a time. Results are
//! delivered through the latches carried by each job.

use std::sync::Arc;

use flume::Receiver;

use crate::error::RenderError;
use crate::raster::{RasterFault, Rasterizer};
use crate::request::{Latch, RenderJob};

/// Completed by the worker once the backend is constructed; carries the
/// page count or the open failure.
pub(crate) type DocumentGate = Arc<Latch<usize>>;

/// Worker entry point. The backend factory runs here so backend types
/// never have to cross threads.
pub(crate) fn render_worker<F>(factory: F, info: &DocumentGate, jobs: &Receiver<RenderJob>)
where
    F: FnOnce() -> Result<Box<dyn Rasterizer>, RasterFault>,
{
    let mut backend = match factory() {
        Ok(backend) => backend,
        Err(fault) => {
            info.complete(Err(RenderError::DocumentOpen {
                detail: fault.to_string(),
            }));
            return;
        }
    };
    info.complete(Ok(backend.page_count()));

    for job in jobs.iter() {
        match job {
            RenderJob::ResolvePage { number, slot } => {
                let result = backend
                    .load_page(number)
                    .map_err(|fault| RenderError::PageLoad {
                        page: number,
                        detail: fault.to_string(),
                    });
                if let Err(err) = &result {
                    log::warn!("page {number} failed to load: {err}");
                }
                slot.complete(result);
            }

            RenderJob::ResolveText { page, slot } => {
                let number = page.number;
                let result = backend
                    .page_text(&page)
                    .map(Arc::new)
                    .map_err(|fault| RenderError::PageLoad {
                        page: number,
                        detail: fault.to_string(),
                    });
                slot.complete(result);
            }

            RenderJob::RenderMain {
                page,
                scale,
                surface,
                hold,
            } => {
                let result = {
                    let mut pixels = surface
                        .pixels
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    backend.render_page(&page, scale, &mut pixels).map_err(
                        |fault| RenderError::RenderFailure {
                            page: page.number,
                            scale,
                            detail: fault.to_string(),
                        },
                    )
                };
                if let Err(err) = &result {
                    log::warn!("main surface {} render failed: {err}", surface.id);
                } else {
                    log::debug!(
                        "main surface {} rendered for page {} at scale {scale}",
                        surface.id,
                        page.number
                    );
                }
                surface.rendered.complete(result);
                if let Err(err) = hold.release() {
                    log::error!("render hold release failed: {err}");
                }
            }

            RenderJob::Shutdown => break,
        }
    }
}
