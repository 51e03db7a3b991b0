//! Photograph decoding.
//!
//! Phone cameras store pixels in sensor order and record how to turn them
//! upright in EXIF. The stages measure shapes and compare mirrored halves,
//! so the image is put upright before anything else sees it. Transparent
//! pixels (cut-out PNGs, WebP stickers) are composited over white, since
//! the raw color under zero alpha is whatever the encoder left there.

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb};

use crate::types::{AppraisalError, RgbImage};

/// What transparent regions are composited over.
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Decode a photograph into upright, opaque 8-bit RGB.
///
/// # Errors
///
/// Returns [`AppraisalError::EmptyInput`] for no bytes and
/// [`AppraisalError::ImageDecode`] when the format is unknown or the
/// data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, AppraisalError> {
    if bytes.is_empty() {
        return Err(AppraisalError::EmptyInput);
    }

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_decoder()?;
    // A broken EXIF block should not cost the whole photograph.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    if orientation != Orientation::NoTransforms {
        tracing::debug!(?orientation, "applying EXIF orientation");
        img.apply_orientation(orientation);
    }
    Ok(flatten(&img, BACKGROUND))
}

/// Composite `img` over a solid `background`.
fn flatten(img: &DynamicImage, background: Rgb<u8>) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8, bg: u8| {
            let a = u16::from(a);
            let v = (u16::from(c) * a + u16::from(bg) * (255 - a) + 127) / 255;
            u8::try_from(v).unwrap_or(u8::MAX)
        };
        Rgb([
            blend(r, background.0[0]),
            blend(g, background.0[1]),
            blend(b, background.0[2]),
        ])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn no_bytes_is_empty_input() {
        assert!(matches!(decode(&[]), Err(AppraisalError::EmptyInput)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode(&[0xFF, 0xFE, 0x00, 0x01]).unwrap_err();
        assert_eq!(err.kind(), "image_decode");
    }

    #[test]
    fn opaque_png_passes_through() {
        let koi = RgbImage::from_fn(4, 3, |x, y| Rgb([215, 35, u8::try_from(x * 10 + y).unwrap()]));
        let decoded = decode(&encode(DynamicImage::ImageRgb8(koi.clone()), ImageFormat::Png)).unwrap();
        assert_eq!(decoded, koi);
    }

    #[test]
    fn transparent_pixels_land_on_white() {
        let cutout = RgbaImage::from_fn(3, 1, |x, _| match x {
            0 => Rgba([10, 20, 30, 0]),
            1 => Rgba([215, 35, 25, 255]),
            _ => Rgba([0, 0, 0, 128]),
        });
        let decoded = decode(&encode(DynamicImage::ImageRgba8(cutout), ImageFormat::Png)).unwrap();
        assert_eq!(decoded.get_pixel(0, 0), &BACKGROUND);
        assert_eq!(decoded.get_pixel(1, 0).0, [215, 35, 25]);
        // Half-transparent black over white is mid gray.
        assert_eq!(decoded.get_pixel(2, 0).0, [127, 127, 127]);
    }

    #[test]
    fn orientation_turns_image_upright() {
        // Sensor order: 3 wide, 2 tall, red in the top-left corner.
        let sensor = RgbImage::from_fn(3, 2, |x, y| {
            if (x, y) == (0, 0) { Rgb([255, 0, 0]) } else { Rgb([0, 0, 0]) }
        });
        let mut img = DynamicImage::ImageRgb8(sensor);
        img.apply_orientation(Orientation::Rotate90);
        let upright = flatten(&img, BACKGROUND);
        assert_eq!(upright.dimensions(), (2, 3));
        // Clockwise quarter turn moves the top-left corner to the top-right.
        assert_eq!(upright.get_pixel(1, 0).0, [255, 0, 0]);
    }
}
