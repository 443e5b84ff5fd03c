//! Pixel data accepted by texture uploads

/// A width x height block of packed RGBA8 pixels in row-major order
pub trait PixelSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Returns `width * height * 4` bytes
    fn pixels(&self) -> &[u8];
}

impl PixelSource for image::RgbaImage {
    fn width(&self) -> u32 {
        image::ImageBuffer::width(self)
    }

    fn height(&self) -> u32 {
        image::ImageBuffer::height(self)
    }

    fn pixels(&self) -> &[u8] {
        self.as_raw()
    }
}

/// Returns the size of each level of a mip chain
///
/// Level 0 is `width x height`; each following level halves both sides, never going below 1.
pub fn mip_level_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shrink = |size: u32| size.checked_shr(level).unwrap_or(0).max(1);
    (shrink(width), shrink(height))
}
