use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbaImage;
use thiserror::Error;

use crate::ops::ChunkMap;

/// Prefix of every image data URL this crate writes.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Error type for image file / buffer operations
#[derive(Debug, Error)]
pub enum ImageIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("PNG encode error: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("invalid data URL: {0}")]
    DataUrl(String),
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode any supported image file into RGBA8.
pub fn load_image(path: &Path) -> Result<RgbaImage, ImageIoError> {
    let bytes = fs::read(path)?;
    decode_image(&bytes)
}

/// Decode an in-memory encoded image (PNG, JPEG, WEBP, BMP, GIF) into RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, ImageIoError> {
    Ok(image::load_from_memory(bytes)?.into_rgba8())
}

/// Decode a `data:<mime>;base64,<payload>` URL into RGBA8.
pub fn decode_data_url(url: &str) -> Result<RgbaImage, ImageIoError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ImageIoError::DataUrl("missing \"data:\" scheme".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageIoError::DataUrl("missing ',' separator".into()))?;
    if !meta.ends_with(";base64") {
        return Err(ImageIoError::DataUrl(format!(
            "unsupported encoding in {:?}",
            meta
        )));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageIoError::DataUrl(e.to_string()))?;
    decode_image(&bytes)
}

// ============================================================================
// ENCODING
// ============================================================================

/// Encode RGBA8 pixels as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageIoError> {
    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;
    }
    Ok(buf)
}

/// PNG-encode and wrap as a base64 data URL.
pub fn to_png_data_url(image: &RgbaImage) -> Result<String, ImageIoError> {
    let png = encode_png(image)?;
    let mut url = String::with_capacity(PNG_DATA_URL_PREFIX.len() + png.len() * 4 / 3 + 4);
    url.push_str(PNG_DATA_URL_PREFIX);
    STANDARD.encode_string(&png, &mut url);
    Ok(url)
}

/// Write RGBA8 pixels to `path` as PNG.
pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), ImageIoError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, image.width(), image.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(image.as_raw())?;
    writer.finish()?;
    Ok(())
}

/// Write every chunk as `<dir>/<xxxx>_<yyyy>.png`.  Returns the written paths
/// in tile order.
pub fn export_chunks(map: &ChunkMap, dir: &Path) -> Result<Vec<PathBuf>, ImageIoError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(map.len());
    for chunk in map.iter() {
        let path = dir.join(format!("{:04}_{:04}.png", chunk.key.x, chunk.key.y));
        save_png(&chunk.pixels, &path)?;
        written.push(path);
    }
    Ok(written)
}
