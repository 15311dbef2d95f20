//! Image normalization: decode arbitrary encoded bytes into a [`PixelBuffer`].
//!
//! Grayscale inputs are replicated into three channels, alpha is composited
//! over white, and 16-bit or float samples are rescaled to 8 bits.

use crate::types::PixelBuffer;
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image dimensions are zero")]
    ZeroDimensions,
}

/// Decode encoded image bytes (PNG, JPEG, ...) into a canonical RGB buffer.
pub fn decode_image(bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::ZeroDimensions);
    }
    Ok(to_canonical(image))
}

/// Decode a base64 image payload, optionally carrying a
/// `data:image/...;base64,` header.
pub fn decode_base64_image(payload: &str) -> Result<PixelBuffer, DecodeError> {
    let bytes = decode_base64(payload)?;
    decode_image(&bytes)
}

/// Strip an optional data-URL header and decode the base64 body.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let body = strip_data_url(payload);
    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(general_purpose::STANDARD.decode(cleaned)?)
}

/// Everything after the first comma, or the whole payload if there is none.
pub fn strip_data_url(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, body)) => body,
        None => payload,
    }
}

fn to_canonical(image: DynamicImage) -> PixelBuffer {
    let rgb = if image.color().has_alpha() {
        flatten_alpha(&image)
    } else {
        image.into_rgb8()
    };
    PixelBuffer::from_rgb(rgb)
}

/// Composite an image with alpha onto a white background.
fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        rgb.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, ImageFormat, Luma, Rgb, RgbaImage};
    use std::io::Cursor;

    fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn assert_canonical(buf: &PixelBuffer, width: u32, height: u32) {
        assert_eq!(buf.width(), width);
        assert_eq!(buf.height(), height);
        assert_eq!(buf.channels(), 3);
        assert_eq!(buf.data().len(), (width * height * 3) as usize);
    }

    #[test]
    fn test_grayscale_replicated() {
        let gray = GrayImage::from_pixel(5, 3, Luma([90]));
        let buf = decode_image(&encode_png(DynamicImage::ImageLuma8(gray))).unwrap();
        assert_canonical(&buf, 5, 3);
        assert_eq!(buf.pixel(4, 2), [90, 90, 90]);
    }

    #[test]
    fn test_rgb_passthrough() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let buf = decode_image(&encode_png(DynamicImage::ImageRgb8(rgb))).unwrap();
        assert_canonical(&buf, 4, 4);
        assert_eq!(buf.pixel(0, 0), [10, 20, 30]);
    }

    #[test]
    fn test_alpha_composited_over_white() {
        let mut rgba = RgbaImage::from_pixel(2, 1, image::Rgba([10, 20, 30, 255]));
        rgba.put_pixel(1, 0, image::Rgba([255, 0, 0, 0]));
        let buf = decode_image(&encode_png(DynamicImage::ImageRgba8(rgba))).unwrap();
        assert_canonical(&buf, 2, 1);
        assert_eq!(buf.pixel(0, 0), [10, 20, 30]);
        assert_eq!(buf.pixel(1, 0), [255, 255, 255]);
    }

    #[test]
    fn test_sixteen_bit_downconverted() {
        let deep: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(3, 2, Luma([0x8080]));
        let buf = decode_image(&encode_png(DynamicImage::ImageLuma16(deep))).unwrap();
        assert_canonical(&buf, 3, 2);
        assert_eq!(buf.pixel(1, 1), [128, 128, 128]);
    }

    #[test]
    fn test_sixteen_bit_rgba_downconverted() {
        let deep: ImageBuffer<image::Rgba<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(2, 2, image::Rgba([65535, 0, 0, 65535]));
        let buf = decode_image(&encode_png(DynamicImage::ImageRgba16(deep))).unwrap();
        assert_canonical(&buf, 2, 2);
        assert_eq!(buf.pixel(0, 0), [255, 0, 0]);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(decode_image(b"not an image"), Err(DecodeError::Image(_))));
        assert!(matches!(decode_image(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_data_url_header_stripped() {
        let png = encode_png(DynamicImage::ImageRgb8(RgbImage::new(2, 2)));
        let b64 = general_purpose::STANDARD.encode(&png);
        let buf = decode_base64_image(&format!("data:image/png;base64,{b64}")).unwrap();
        assert_canonical(&buf, 2, 2);
        let buf = decode_base64_image(&b64).unwrap();
        assert_canonical(&buf, 2, 2);
    }

    #[test]
    fn test_invalid_base64() {
        assert!(matches!(
            decode_base64_image("data:image/png;base64,@@@"),
            Err(DecodeError::Base64(_))
        ));
        assert!(matches!(decode_base64_image("data:image/png;base64,"), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }
}
