//! Thumbnail generation: center-crop a source page to 16:9, resize
//! to 1280x720, re-encode as JPEG q85.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::error::IngestError;

pub const TARGET_WIDTH: u32 = 1280;
pub const TARGET_HEIGHT: u32 = 720;
pub const JPEG_QUALITY: u8 = 85;

fn crop_to_16_9(img: DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    let target_ratio = TARGET_WIDTH as f64 / TARGET_HEIGHT as f64;
    let current_ratio = width as f64 / height as f64;

    if (current_ratio - target_ratio).abs() < 0.01 {
        return img;
    }

    if current_ratio > target_ratio {
        let new_width = (height as f64 * target_ratio) as u32;
        let left = (width - new_width) / 2;
        img.crop_imm(left, 0, new_width, height)
    } else {
        let new_height = (width as f64 / target_ratio) as u32;
        let top = (height - new_height) / 2;
        img.crop_imm(0, top, width, new_height)
    }
}

/// Flatten to RGB, compositing any alpha channel over a white background
/// instead of letting `to_rgb8` silently truncate it.
fn flatten_to_rgb_over_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let alpha = a as f32 / 255.0;
        let blend = |channel: u8| (channel as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    out
}

/// Run the center-crop/resize/re-encode pipeline on raw image bytes. CPU
/// bound; callers run this inside `spawn_blocking`.
pub fn generate_thumbnail(source_bytes: &[u8]) -> Result<Vec<u8>, IngestError> {
    let img = image::load_from_memory(source_bytes)?;
    let cropped = crop_to_16_9(img);
    let resized = cropped.resize_exact(TARGET_WIDTH, TARGET_HEIGHT, FilterType::Lanczos3);

    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode_image(&flatten_to_rgb_over_white(&resized))
        .map_err(|e| IngestError::Thumbnail(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb([200, 100, 50]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn produces_target_dimensions_for_tall_source() {
        let source = sample_png(800, 1200);
        let out = generate_thumbnail(&source).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (TARGET_WIDTH, TARGET_HEIGHT));
    }

    #[test]
    fn produces_target_dimensions_for_wide_source() {
        let source = sample_png(2000, 800);
        let out = generate_thumbnail(&source).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (TARGET_WIDTH, TARGET_HEIGHT));
    }

    #[test]
    fn already_16_9_needs_no_crop() {
        let source = sample_png(1920, 1080);
        let out = generate_thumbnail(&source).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (TARGET_WIDTH, TARGET_HEIGHT));
    }

    #[test]
    fn transparent_pixels_composite_over_white() {
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 128]));
        let flattened = flatten_to_rgb_over_white(&DynamicImage::ImageRgba8(img));

        assert_eq!(flattened.get_pixel(1, 1).0, [255, 255, 255]);
        let half_transparent = flattened.get_pixel(0, 0).0;
        assert!(half_transparent[0] > 100 && half_transparent[0] < 160);
    }

    #[test]
    fn opaque_source_has_no_alpha_passthrough() {
        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let flattened = flatten_to_rgb_over_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(flattened.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
