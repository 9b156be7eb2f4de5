use std::io::BufReader;
use std::path::Path;

use image::DynamicImage;

use crate::error::Result;
use crate::haar::{NUM_PIXELS, Signature};

/// File extensions the indexer picks up.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "tga", "pnm", "ppm", "pgm", "qoi",
];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Load a file upright, decoding JPEGs at the smallest DCT scale that is
/// still at least `NUM_PIXELS` on each side.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let img = match decode_jpeg_scaled(path, NUM_PIXELS as u16) {
        Some(img) => img,
        None => image::open(path)?,
    };
    Ok(apply_orientation(img, read_orientation(path)))
}

/// Load and fingerprint one file.
pub fn signature_for_file(path: &Path) -> Result<Signature> {
    Ok(Signature::from_image(&load_image(path)?))
}

/// Returns None for non-JPEG files or when the decoder fails, so the
/// caller can fall back to a full decode.
fn decode_jpeg_scaled(path: &Path, min_size: u16) -> Option<DynamicImage> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if ext != "jpg" && ext != "jpeg" {
        return None;
    }

    let file = std::fs::File::open(path).ok()?;
    let mut decoder = jpeg_decoder::Decoder::new(BufReader::new(file));
    let (width, height) = decoder.scale(min_size, min_size).ok()?;
    let pixels = decoder.decode().ok()?;
    let format = decoder.info()?.pixel_format;

    match format {
        jpeg_decoder::PixelFormat::RGB24 => {
            image::RgbImage::from_raw(width as u32, height as u32, pixels).map(DynamicImage::ImageRgb8)
        }
        jpeg_decoder::PixelFormat::L8 => {
            image::GrayImage::from_raw(width as u32, height as u32, pixels).map(DynamicImage::ImageLuma8)
        }
        _ => None,
    }
}

fn read_orientation(path: &Path) -> u32 {
    let Ok(file) = std::fs::File::open(path) else {
        return 1;
    };
    let Ok(exif) = exif::Reader::new().read_from_container(&mut BufReader::new(file)) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
