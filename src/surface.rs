//! Raster surfaces - RGBA8 pixel buffers shared between renders

/// Bytes per pixel (RGBA8).
pub const PIXEL_BYTES: usize = 4;

/// A mutable width x height RGBA8 pixel buffer.
///
/// Main surfaces hold a full-page render at a fixed scale; secondary
/// surfaces hold only a vertical slice copied out of a main surface.
/// The buffer itself does not know which kind it is.
#[derive(Clone)]
pub struct RasterSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterSurface {
    /// Create a zeroed surface of the given dimensions.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * PIXEL_BYTES],
        }
    }

    /// Create an empty 0x0 surface.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reallocate to new dimensions, zeroing the contents. Backends may
    /// call this when the rasterized output differs from the requested
    /// viewport by a pixel.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels
            .resize(width as usize * height as usize * PIXEL_BYTES, 0);
    }

    /// RGBA value of the pixel at `(x, y)`.
    ///
    /// # Panics
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let start = (y as usize * self.width as usize + x as usize) * PIXEL_BYTES;
        let px = &self.pixels[start..start + PIXEL_BYTES];
        [px[0], px[1], px[2], px[3]]
    }

    /// One row of pixel data.
    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        let row_bytes = self.width as usize * PIXEL_BYTES;
        let start = y as usize * row_bytes;
        &self.pixels[start..start + row_bytes]
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Copy `rows` full-width rows starting at `y0` into a new surface.
    /// The range is clamped to the source bounds.
    #[must_use]
    pub fn vertical_slice(&self, y0: u32, rows: u32) -> RasterSurface {
        let y0 = y0.min(self.height);
        let rows = rows.min(self.height - y0);
        let row_bytes = self.width as usize * PIXEL_BYTES;
        let start = y0 as usize * row_bytes;
        let end = start + rows as usize * row_bytes;
        Self {
            width: self.width,
            height: rows,
            pixels: self.pixels[start..end].to_vec(),
        }
    }

    /// Fill the entire surface with one RGBA value.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(PIXEL_BYTES) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Overwrite the pixel at `(x, y)`.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let start = (y as usize * self.width as usize + x as usize) * PIXEL_BYTES;
        self.pixels[start..start + PIXEL_BYTES].copy_from_slice(&rgba);
    }
}

impl std::fmt::Debug for RasterSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
