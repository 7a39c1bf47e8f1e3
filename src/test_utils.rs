//! In-memory fake rasterizer for tests.
//!
//! Pages render as white rasters; `with_content_band` paints a vertical
//! fraction of a page with non-uniform rows so cut detection has something
//! to find. A [`FakeProbe`] cloned before the backend moves to the worker
//! thread observes call counts and injects failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::raster::{PageInfo, RasterFault, Rasterizer, TextLine};
use crate::surface::RasterSurface;

#[derive(Default)]
struct ProbeInner {
    load_calls: AtomicUsize,
    render_calls: AtomicUsize,
    text_calls: AtomicUsize,
    fail_loads: Mutex<HashSet<usize>>,
    fail_renders: Mutex<HashSet<usize>>,
}

/// Shared observation and fault-injection handle for a [`FakeRasterizer`].
#[derive(Clone, Default)]
pub struct FakeProbe {
    inner: Arc<ProbeInner>,
}

impl FakeProbe {
    pub fn load_calls(&self) -> usize {
        self.inner.load_calls.load(Ordering::SeqCst)
    }

    pub fn render_calls(&self) -> usize {
        self.inner.render_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.inner.text_calls.load(Ordering::SeqCst)
    }

    /// Make `load_page` fail for this page until cleared.
    pub fn fail_load(&self, page: usize) {
        self.inner.fail_loads.lock().unwrap().insert(page);
    }

    /// Make `render_page` fail for this page until cleared.
    pub fn fail_render(&self, page: usize) {
        self.inner.fail_renders.lock().unwrap().insert(page);
    }

    pub fn clear_failures(&self) {
        self.inner.fail_loads.lock().unwrap().clear();
        self.inner.fail_renders.lock().unwrap().clear();
    }

    fn load_should_fail(&self, page: usize) -> bool {
        self.inner.fail_loads.lock().unwrap().contains(&page)
    }

    fn render_should_fail(&self, page: usize) -> bool {
        self.inner.fail_renders.lock().unwrap().contains(&page)
    }
}

/// Deterministic in-memory backend.
pub struct FakeRasterizer {
    pages: Vec<(f32, f32)>,
    probe: FakeProbe,
    render_delay: Duration,
    /// `(page, start, end)` vertical fractions painted with non-uniform
    /// rows.
    content_bands: Vec<(usize, f32, f32)>,
}

impl FakeRasterizer {
    /// A document of `page_count` identical 600x800 pages.
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: vec![(600.0, 800.0); page_count],
            probe: FakeProbe::default(),
            render_delay: Duration::ZERO,
            content_bands: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page: usize, width: f32, height: f32) -> Self {
        self.pages[page] = (width, height);
        self
    }

    /// Every render of any page sleeps this long first, to widen windows
    /// in concurrency tests.
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn with_content_band(mut self, page: usize, start: f32, end: f32) -> Self {
        self.content_bands.push((page, start, end));
        self
    }

    /// Clone the probe before moving the backend into an engine.
    pub fn probe(&self) -> FakeProbe {
        self.probe.clone()
    }
}

impl Rasterizer for FakeRasterizer {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn load_page(&mut self, number: usize) -> Result<PageInfo, RasterFault> {
        self.probe.inner.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.load_should_fail(number) {
            return Err(RasterFault::generic(format!(
                "injected load failure on page {number}"
            )));
        }
        let (width, height) = *self
            .pages
            .get(number)
            .ok_or_else(|| RasterFault::generic(format!("page {number} out of range")))?;
        Ok(PageInfo {
            number,
            width,
            height,
        })
    }

    fn render_page(
        &mut self,
        page: &PageInfo,
        scale: f32,
        target: &mut RasterSurface,
    ) -> Result<(), RasterFault> {
        self.probe.inner.render_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.render_should_fail(page.number) {
            return Err(RasterFault::generic(format!(
                "injected render failure on page {}",
                page.number
            )));
        }
        if !self.render_delay.is_zero() {
            std::thread::sleep(self.render_delay);
        }

        let (width, height) = page.viewport(scale);
        target.resize(width, height);
        target.fill([0xff, 0xff, 0xff, 0xff]);

        for &(band_page, start, end) in &self.content_bands {
            if band_page != page.number {
                continue;
            }
            let y0 = (height as f32 * start) as u32;
            let y1 = (height as f32 * end) as u32;
            for y in y0..y1.min(height) {
                // a single dark pixel away from column zero makes the row
                // non-uniform
                target.put_pixel(width / 2, y, [0x20, 0x20, 0x20, 0xff]);
            }
        }
        Ok(())
    }

    fn page_text(&mut self, page: &PageInfo) -> Result<Vec<TextLine>, RasterFault> {
        self.probe.inner.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .content_bands
            .iter()
            .filter(|(band_page, _, _)| *band_page == page.number)
            .map(|&(_, start, end)| TextLine {
                x0: 0.0,
                y0: page.height * start,
                x1: page.width,
                y1: page.height * end,
                text: format!("band {start}..{end}"),
            })
            .collect())
    }
}
