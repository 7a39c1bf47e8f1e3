//! mupdf-backed rasterizer (feature `pdf`)

use std::path::Path;

use mupdf::text_page::TextBlockType;
use mupdf::{Colorspace, Document, Matrix, Pixmap, TextPageFlags};

use crate::raster::{PageInfo, RasterFault, Rasterizer, TextLine};
use crate::surface::RasterSurface;

pub struct MupdfRasterizer {
    doc: Document,
    page_count: usize,
}

impl MupdfRasterizer {
    pub fn open(path: &Path) -> Result<Self, RasterFault> {
        let doc = Document::open(path.to_string_lossy().as_ref())?;
        let page_count = doc.page_count()? as usize;
        Ok(Self { doc, page_count })
    }
}

impl Rasterizer for MupdfRasterizer {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn load_page(&mut self, number: usize) -> Result<PageInfo, RasterFault> {
        if number >= self.page_count {
            return Err(RasterFault::generic(format!(
                "page {number} out of range (document has {} pages)",
                self.page_count
            )));
        }
        let page = self.doc.load_page(number as i32)?;
        let bounds = page.bounds()?;
        Ok(PageInfo {
            number,
            width: bounds.x1 - bounds.x0,
            height: bounds.y1 - bounds.y0,
        })
    }

    fn render_page(
        &mut self,
        page: &PageInfo,
        scale: f32,
        target: &mut RasterSurface,
    ) -> Result<(), RasterFault> {
        let loaded = self.doc.load_page(page.number as i32)?;
        let transform = Matrix::new_scale(scale, scale);
        let rgb = Colorspace::device_rgb();
        let pixmap = loaded.to_pixmap(&transform, &rgb, true, false)?;
        copy_pixmap(&pixmap, target)
    }

    fn page_text(&mut self, page: &PageInfo) -> Result<Vec<TextLine>, RasterFault> {
        let loaded = self.doc.load_page(page.number as i32)?;
        let text_page = loaded.to_text_page(TextPageFlags::empty())?;

        let mut lines = Vec::new();
        for block in text_page.blocks() {
            if block.r#type() != TextBlockType::Text {
                continue;
            }
            for line in block.lines() {
                let bbox = line.bounds();
                let text: String = line.chars().filter_map(|ch| ch.char()).collect();
                lines.push(TextLine {
                    x0: bbox.x0,
                    y0: bbox.y0,
                    x1: bbox.x1,
                    y1: bbox.y1,
                    text,
                });
            }
        }
        Ok(lines)
    }
}

/// Copy the pixmap into `target` as RGBA, honoring the pixmap stride.
fn copy_pixmap(pixmap: &Pixmap, target: &mut RasterSurface) -> Result<(), RasterFault> {
    let n = pixmap.n() as usize;
    if n != 3 && n != 4 {
        return Err(RasterFault::generic(format!(
            "unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(RasterFault::generic("pixmap buffer size mismatch"));
    }

    target.resize(pixmap.width(), pixmap.height());
    let out = target.as_bytes_mut();
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        let dst = &mut out[y * width * 4..(y + 1) * width * 4];
        if n == 4 {
            dst.copy_from_slice(row);
        } else {
            for (src_px, dst_px) in row.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                dst_px[..3].copy_from_slice(src_px);
                dst_px[3] = 0xff;
            }
        }
    }
    Ok(())
}
