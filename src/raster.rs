// ============================================================================
// RASTER — row-major interleaved 8-bit pixel buffer
// ============================================================================

use crate::error::RotateError;

/// An immutable, tightly packed pixel buffer.
///
/// Samples are stored row-major with channels interleaved in R,G,B[,A]
/// order.  `pixels.len() == width * height * channels` always holds; the
/// only way to build one is [`Image::new`], which checks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, RotateError> {
        if width == 0 || height == 0 {
            return Err(RotateError::InvalidImage(format!(
                "dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        if channels == 0 {
            return Err(RotateError::InvalidImage("zero channels per pixel".into()));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(RotateError::InvalidImage(format!(
                "{}x{}x{} needs {} samples, got {}",
                width,
                height,
                channels,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, channels, pixels })
    }

    /// An image where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: &[u8]) -> Result<Self, RotateError> {
        let channels = u8::try_from(color.len())
            .map_err(|_| RotateError::InvalidImage(format!("{} channels", color.len())))?;
        let count = width as usize * height as usize;
        let pixels = color.iter().copied().cycle().take(count * color.len()).collect();
        Self::new(width, height, channels, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.channels as u32 * 8
    }

    /// Total number of channel samples (`width * height * channels`).
    pub fn sample_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Index of channel `c` of pixel `(x, y)` in the flat buffer.
    pub fn sample_index(&self, x: u32, y: u32, c: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize + c as usize
    }

    /// The channel values of pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = self.sample_index(x, y, 0);
        &self.pixels[start..start + self.channels as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_mismatch() {
        let err = Image::new(2, 2, 3, vec![0; 11]).unwrap_err();
        assert!(matches!(err, RotateError::InvalidImage(_)));
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(Image::new(0, 4, 3, vec![]).is_err());
        assert!(Image::new(4, 0, 4, vec![]).is_err());
    }

    #[test]
    fn filled_repeats_color() {
        let img = Image::filled(3, 2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(img.channels(), 4);
        assert_eq!(img.bits_per_pixel(), 32);
        assert_eq!(img.sample_count(), 24);
        for y in 0..2 {
            for x in 0..3 {
                assert_eq!(img.pixel(x, y), &[1, 2, 3, 4]);
            }
        }
    }

    #[test]
    fn sample_index_is_row_major() {
        let img = Image::new(4, 3, 3, vec![0; 36]).unwrap();
        assert_eq!(img.sample_index(0, 0, 0), 0);
        assert_eq!(img.sample_index(1, 0, 2), 5);
        assert_eq!(img.sample_index(0, 1, 0), 12);
        assert_eq!(img.sample_index(3, 2, 2), 35);
    }
}
