// THEORY:
// The codec is the only place where files meet pixels. Everything behind it works on
// tightly packed 8-bit RGBA `PixelBuffer`s; everything in front of it is a path.
//
// Decoding accepts whatever the `image` crate can read and normalises it to RGBA8.
// Callers pick the output format, usually from the path's extension. PNG and BMP keep the
// alpha channel; JPEG has none, so alpha is dropped on the way out.
//
// The `ImageCodec` trait is the seam a session is generic over, so tests and
// embedders can substitute an in-memory codec.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::ImageEncoder;
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use log::debug;

use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::error::CodecError;

const JPEG_QUALITY: u8 = 90;

/// Output formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Bmp,
}

impl ImageFormat {
    /// `.jpg`/`.jpeg` and `.bmp` (any case) select those formats; anything else is PNG.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("jpg" | "jpeg") => ImageFormat::Jpeg,
            Some("bmp") => ImageFormat::Bmp,
            _ => ImageFormat::Png,
        }
    }
}

pub trait ImageCodec {
    fn decode(&self, path: &Path) -> Result<PixelBuffer, CodecError>;
    fn encode(&self, buffer: &PixelBuffer, path: &Path, format: ImageFormat) -> Result<(), CodecError>;
}

/// `ImageCodec` backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, path: &Path) -> Result<PixelBuffer, CodecError> {
        let decoded = image::open(path).map_err(|source| CodecError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("decoded {} as {width}x{height}", path.display());
        Ok(PixelBuffer::from_rgba(width, height, rgba.into_raw())?)
    }

    fn encode(&self, buffer: &PixelBuffer, path: &Path, format: ImageFormat) -> Result<(), CodecError> {
        let rgba = buffer.to_rgba_vec();
        let (width, height) = (buffer.width(), buffer.height());

        write_image(path, format, &rgba, width, height).map_err(|source| CodecError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("encoded {width}x{height} to {} as {format:?}", path.display());
        Ok(())
    }
}

fn write_image(
    path: &Path,
    format: ImageFormat,
    rgba: &[u8],
    width: u32,
    height: u32,
) -> Result<(), image::ImageError> {
    let mut output = BufWriter::new(File::create(path)?);

    match format {
        ImageFormat::Png => {
            PngEncoder::new(&mut output).write_image(rgba, width, height, image::ExtendedColorType::Rgba8)?
        }
        ImageFormat::Bmp => {
            BmpEncoder::new(&mut output).write_image(rgba, width, height, image::ExtendedColorType::Rgba8)?
        }
        ImageFormat::Jpeg => {
            let rgb: Vec<u8> = rgba
                .chunks_exact(4)
                .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                .collect();
            JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY).write_image(
                &rgb,
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )?
        }
    }

    std::io::Write::flush(&mut output)?;
    Ok(())
}
