// ============================================================================
// ROTATION MATH — parameters shared by the kernel and the CPU reference
// ============================================================================
//
// The WGSL kernel in rotation.wgsl and `rotate_reference` below evaluate the
// same expression in f32.  The CPU path is only used to validate GPU output;
// the pipeline never falls back to it.

use rayon::prelude::*;

use crate::error::RotateError;
use crate::raster::Image;

/// Value written where the inverse-rotated sample falls outside the source.
pub const BACKGROUND: u8 = 0;

/// Per-call rotation parameters.  `sin_theta` / `cos_theta` are evaluated
/// once in f64 and narrowed, so quarter turns produce exact 0/±1 terms up to
/// f32 rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationParams {
    pub angle_radians: f64,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub sin_theta: f32,
    pub cos_theta: f32,
}

impl RotationParams {
    pub fn new(angle_radians: f64, image: &Image) -> Self {
        let (sin, cos) = angle_radians.sin_cos();
        Self {
            angle_radians,
            width: image.width(),
            height: image.height(),
            channels: image.channels() as u32,
            sin_theta: sin as f32,
            cos_theta: cos as f32,
        }
    }

    /// Source pixel sampled by output pixel `(x, y)`, or `None` when the
    /// inverse rotation lands outside the image.
    ///
    /// Coordinates are taken at pixel centres relative to
    /// `(width / 2, height / 2)`; the result is the nearest source pixel.
    pub fn source_coord(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        let cx = self.width as f32 * 0.5;
        let cy = self.height as f32 * 0.5;
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;

        let sx = (self.cos_theta * dx + self.sin_theta * dy + cx).floor();
        let sy = (-self.sin_theta * dx + self.cos_theta * dy + cy).floor();

        if sx < 0.0 || sy < 0.0 || sx >= self.width as f32 || sy >= self.height as f32 {
            return None;
        }
        Some((sx as u32, sy as u32))
    }
}

/// Rotate `image` on the CPU with the kernel's exact sampling rule.
pub fn rotate_reference(image: &Image, angle_radians: f64) -> Result<Image, RotateError> {
    let channels = image.channels();
    if channels != 3 && channels != 4 {
        return Err(RotateError::UnsupportedChannelLayout(channels));
    }
    let params = RotationParams::new(angle_radians, image);
    let row_len = image.width() as usize * channels as usize;
    let src = image.pixels();

    let mut out = vec![BACKGROUND; image.sample_count()];
    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for x in 0..params.width {
            if let Some((sx, sy)) = params.source_coord(x, y as u32) {
                let from = image.sample_index(sx, sy, 0);
                let to = x as usize * channels as usize;
                row[to..to + channels as usize]
                    .copy_from_slice(&src[from..from + channels as usize]);
            }
        }
    });

    Image::new(image.width(), image.height(), channels, out)
}
