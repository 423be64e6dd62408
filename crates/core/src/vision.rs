use image::{
    DynamicImage, RgbaImage,
    imageops::{self, FilterType},
};
use tracing::debug;

use crate::{
    config::ImageSize,
    error::{VlmError, VlmResult},
    metadata::VisionInput,
};

pub fn decode_image(bytes: &[u8]) -> VlmResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(VlmError::ImageDecode("empty image data".into()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|err| VlmError::ImageDecode(format!("failed to decode image: {err}")))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(VlmError::ImageDecode("decoded image has no pixels".into()));
    }
    Ok(image)
}

/// Scales `image` to fit inside `size` keeping its aspect ratio and centres it
/// on a transparent canvas of exactly `size`.
pub fn scale_to_fit(image: &RgbaImage, size: ImageSize) -> RgbaImage {
    let (src_w, src_h) = image.dimensions();
    let (dst_w, dst_h) = (size.width as u32, size.height as u32);
    if (src_w, src_h) == (dst_w, dst_h) {
        return image.clone();
    }

    let scale = f64::min(
        f64::from(dst_w) / f64::from(src_w),
        f64::from(dst_h) / f64::from(src_h),
    );
    let scaled_w = ((f64::from(src_w) * scale).round() as u32).clamp(1, dst_w);
    let scaled_h = ((f64::from(src_h) * scale).round() as u32).clamp(1, dst_h);
    let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas = RgbaImage::new(dst_w, dst_h);
    let x = i64::from((dst_w - scaled_w) / 2);
    let y = i64::from((dst_h - scaled_h) / 2);
    imageops::replace(&mut canvas, &resized, x, y);
    debug!(src_w, src_h, scaled_w, scaled_h, dst_w, dst_h, "scaled image onto canvas");
    canvas
}

/// Planar `[channels, height, width]` floats in `[0, 1]`.
///
/// Colour planes beyond RGB stay zero; alpha is ignored.
pub fn to_chw(image: &RgbaImage, channels: usize) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = width as usize * height as usize;
    let mut chw = vec![0f32; channels * plane];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = y as usize * width as usize + x as usize;
        for (c, &value) in pixel.0.iter().take(channels.min(3)).enumerate() {
            chw[c * plane + idx] = f32::from(value) / 255.0;
        }
    }
    chw
}

/// Decodes encoded image bytes into the vision encoder's pixel buffer.
pub fn preprocess_image_bytes(bytes: &[u8], input: VisionInput) -> VlmResult<Vec<f32>> {
    let image = decode_image(bytes)?;
    let rgba = image.to_rgba8();
    let canvas = scale_to_fit(&rgba, input.size);
    let pixels = to_chw(&canvas, input.channels);
    if pixels.is_empty() {
        return Err(VlmError::ImageDecode("preprocessed image is empty".into()));
    }
    Ok(pixels)
}
