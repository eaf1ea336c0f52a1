// ============================================================================
// PIXEL BUFFER CODEC — uncompressed truecolor TGA in, TGA out
// ============================================================================

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::tga::TgaEncoder;
use image::{ColorType, DynamicImage, ImageError, ImageFormat};

use crate::error::RotateError;
use crate::raster::Image;

/// Decode a 24-bit RGB or 32-bit RGBA TGA file.
///
/// Samples come back in R,G,B[,A] order regardless of the BGR order the
/// file stores them in.
pub fn decode(path: &Path) -> Result<Image, RotateError> {
    if !path.is_file() {
        return Err(RotateError::FileNotFound(path.to_path_buf()));
    }
    let unsupported = |detail: String| RotateError::UnsupportedImageType {
        path: path.to_path_buf(),
        detail,
    };

    let reader = image::io::Reader::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RotateError::FileNotFound(path.to_path_buf()),
        _ => unsupported(e.to_string()),
    })?;
    match reader.format() {
        Some(ImageFormat::Tga) => {}
        Some(other) => return Err(unsupported(format!("{:?} files are not supported", other))),
        None => return Err(unsupported("unknown file type".into())),
    }

    let decoded = reader.decode().map_err(|e| unsupported(e.to_string()))?;
    let (channels, width, height, pixels) = match decoded {
        DynamicImage::ImageRgb8(img) => (3, img.width(), img.height(), img.into_raw()),
        DynamicImage::ImageRgba8(img) => (4, img.width(), img.height(), img.into_raw()),
        other => {
            return Err(unsupported(format!(
                "{:?} layout, expected truecolor RGB or RGBA",
                other.color()
            )));
        }
    };
    Image::new(width, height, channels, pixels)
}

/// Write `image` as TGA.
///
/// The data goes to a hidden sibling file first and is renamed into place
/// only once fully written, so a failure never leaves a partial `path`.
pub fn encode(image: &Image, path: &Path) -> Result<(), RotateError> {
    let color = match image.channels() {
        3 => ColorType::Rgb8,
        4 => ColorType::Rgba8,
        n => return Err(RotateError::UnsupportedChannelLayout(n)),
    };
    let write_error = |detail: String| RotateError::WriteError {
        path: path.to_path_buf(),
        detail,
    };

    let partial = partial_path(path);
    let result = write_tga(image, &partial, color)
        .map_err(|e| write_error(e.to_string()))
        .and_then(|()| fs::rename(&partial, path).map_err(|e| write_error(e.to_string())));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_tga(image: &Image, path: &Path, color: ColorType) -> Result<(), ImageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = TgaEncoder::new(&mut writer);
    encoder.encode(image.pixels(), image.width(), image.height(), color)?;
    writer.flush()?;
    Ok(())
}

/// `dir/.name.part` next to the final output.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.part", name))
}
