//! Pixel normalization
//!
//! Decode, apply EXIF orientation, flatten to opaque RGB, fit into the
//! bounding box, equalize local contrast, re-encode as PNG. Pure and
//! synchronous; callers run it on a blocking thread.

use crate::error::EnhanceError;
use dtx_core::{EnhanceConfig, ImageFormat};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Limits, Rgb, RgbImage};
use std::io::Cursor;

/// Largest decoded dimension accepted
const MAX_DECODE_DIMENSION: u32 = 16_384;

/// Normalized image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// Image normalizer
#[derive(Debug, Clone, Default)]
pub struct ImageEnhancer {
    config: EnhanceConfig,
}

impl ImageEnhancer {
    #[must_use]
    pub fn new(config: EnhanceConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    /// Normalize an encoded image
    ///
    /// # Errors
    /// [`EnhanceError::Decode`] when the payload does not decode as `format`,
    /// [`EnhanceError::Encode`] when PNG encoding fails.
    pub fn enhance(&self, bytes: &[u8], format: ImageFormat) -> Result<EnhancedImage, EnhanceError> {
        let decoded = decode_oriented(bytes, format)?;
        let mut rgb = flatten(&decoded);

        let (width, height) = rgb.dimensions();
        if width > self.config.max_width || height > self.config.max_height {
            rgb = DynamicImage::ImageRgb8(rgb)
                .resize(self.config.max_width, self.config.max_height, FilterType::Lanczos3)
                .to_rgb8();
        }

        if self.config.contrast {
            equalize_local_contrast(&mut rgb, self.config.clahe_tiles, self.config.clahe_clip_limit);
        }

        let (width, height) = rgb.dimensions();
        let mut data = Vec::new();
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .map_err(|e| EnhanceError::Encode(e.to_string()))?;

        Ok(EnhancedImage {
            data,
            width,
            height,
            format: ImageFormat::Png,
        })
    }
}

fn codec(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Webp => image::ImageFormat::WebP,
        ImageFormat::Gif => image::ImageFormat::Gif,
    }
}

fn decode_oriented(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, EnhanceError> {
    let decode_err = |e: image::ImageError| EnhanceError::Decode(e.to_string());

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);

    let mut reader = ImageReader::with_format(Cursor::new(bytes), codec(format));
    reader.limits(limits);
    let mut decoder = reader.into_decoder().map_err(decode_err)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Composite onto white and drop alpha; palette and gray become RGB
fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flat = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            let mixed = (u16::from(channel) * alpha + 255 * (255 - alpha)) / 255;
            u8::try_from(mixed).unwrap_or(u8::MAX)
        };
        flat.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flat
}

/// Contrast-limited adaptive histogram equalization on luma.
///
/// The luma shift is added to every channel, which leaves Cb/Cr unchanged.
fn equalize_local_contrast(image: &mut RgbImage, tiles: u32, clip_limit: f32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let luma: Vec<u8> = image.pixels().map(|p| luma_of(p.0)).collect();
    let equalized = clahe(&luma, width, height, tiles, clip_limit);
    for (pixel, (&before, &after)) in image.pixels_mut().zip(luma.iter().zip(&equalized)) {
        let shift = i16::from(after) - i16::from(before);
        for channel in &mut pixel.0 {
            *channel = u8::try_from((i16::from(*channel) + shift).clamp(0, 255)).unwrap_or(u8::MAX);
        }
    }
}

fn luma_of([r, g, b]: [u8; 3]) -> u8 {
    let y = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let y = y.round().clamp(0.0, 255.0) as u8;
    y
}

/// CLAHE over a single 8-bit channel
pub(crate) fn clahe(luma: &[u8], width: u32, height: u32, tiles: u32, clip_limit: f32) -> Vec<u8> {
    let tiles_x = tiles.clamp(1, width) as usize;
    let tiles_y = tiles.clamp(1, height) as usize;
    let (w, h) = (width as usize, height as usize);

    let bounds = |index: usize, count: usize, extent: usize| (index * extent / count, (index + 1) * extent / count);

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        let (y0, y1) = bounds(ty, tiles_y, h);
        for tx in 0..tiles_x {
            let (x0, x1) = bounds(tx, tiles_x, w);
            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for &value in &luma[y * w + x0..y * w + x1] {
                    histogram[usize::from(value)] += 1;
                }
            }
            let count = u32::try_from((x1 - x0) * (y1 - y0)).unwrap_or(u32::MAX);
            luts.push(tile_lut(&mut histogram, count, clip_limit));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let (tile_w, tile_h) = (w as f32 / tiles_x as f32, h as f32 / tiles_y as f32);
    let neighbors = |pos: usize, tile: f32, count: usize| {
        #[allow(clippy::cast_precision_loss)]
        let g = (pos as f32 + 0.5) / tile - 0.5;
        #[allow(clippy::cast_precision_loss)]
        let g = g.clamp(0.0, (count - 1) as f32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let lo = g.floor() as usize;
        let hi = (lo + 1).min(count - 1);
        (lo, hi, g - g.floor())
    };

    let mut out = Vec::with_capacity(luma.len());
    for y in 0..h {
        let (ty0, ty1, fy) = neighbors(y, tile_h, tiles_y);
        for x in 0..w {
            let (tx0, tx1, fx) = neighbors(x, tile_w, tiles_x);
            let v = usize::from(luma[y * w + x]);
            let at = |ty: usize, tx: usize| f32::from(luts[ty * tiles_x + tx][v]);
            let top = at(ty0, tx0) * (1.0 - fx) + at(ty0, tx1) * fx;
            let bottom = at(ty1, tx0) * (1.0 - fx) + at(ty1, tx1) * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let value = value.round().clamp(0.0, 255.0) as u8;
            out.push(value);
        }
    }
    out
}

/// Clip the histogram, redistribute the excess, and build the CDF mapping
fn tile_lut(histogram: &mut [u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if count == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = u8::try_from(i).unwrap_or(u8::MAX);
        }
        return lut;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let limit = ((clip_limit.max(1.0) * count as f32 / 256.0).ceil() as u32).max(1);
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    for bin in histogram.iter_mut() {
        *bin += share;
    }
    // Spread what is left evenly across the range
    let remainder = (excess % 256) as usize;
    if remainder > 0 {
        let step = (256 / remainder).max(1);
        for i in (0..256).step_by(step).take(remainder) {
            histogram[i] += 1;
        }
    }

    let mut cumulative = 0u64;
    for (bin, slot) in histogram.iter().zip(lut.iter_mut()) {
        cumulative += u64::from(*bin);
        let mapped = (cumulative * 255 + u64::from(count) / 2) / u64::from(count);
        *slot = u8::try_from(mapped.min(255)).unwrap_or(u8::MAX);
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_test_utils::fixtures;

    #[test]
    fn oversized_image_fits_bounding_box() {
        let png = fixtures::png_bytes(400, 200, [10, 120, 200]);
        let enhancer = ImageEnhancer::new(EnhanceConfig {
            max_width: 100,
            max_height: 100,
            ..EnhanceConfig::default()
        });

        let out = enhancer.enhance(&png, ImageFormat::Png).unwrap();

        assert_eq!((out.width, out.height), (100, 50));
        assert_eq!(out.format, ImageFormat::Png);
        assert!(out.data.starts_with(b"\x89PNG"));
    }

    #[test]
    fn small_image_keeps_dimensions() {
        let png = fixtures::png_bytes(32, 16, [0, 0, 0]);
        let out = ImageEnhancer::default().enhance(&png, ImageFormat::Png).unwrap();
        assert_eq!((out.width, out.height), (32, 16));
    }

    #[test]
    fn alpha_and_gray_inputs_become_rgb() {
        for (bytes, format) in [
            (fixtures::rgba_png_bytes(8, 8, [255, 0, 0, 0]), ImageFormat::Png),
            (fixtures::gif_bytes(8, 8, [0, 255, 0]), ImageFormat::Gif),
            (fixtures::jpeg_bytes(8, 8, [0, 0, 255]), ImageFormat::Jpeg),
        ] {
            let out = ImageEnhancer::default().enhance(&bytes, format).unwrap();
            let decoded = image::load_from_memory(&out.data).unwrap();
            assert_eq!(decoded.color(), image::ColorType::Rgb8);
        }
    }

    #[test]
    fn transparent_pixels_flatten_to_white() {
        let png = fixtures::rgba_png_bytes(4, 4, [255, 0, 0, 0]);
        let enhancer = ImageEnhancer::new(EnhanceConfig {
            contrast: false,
            ..EnhanceConfig::default()
        });
        let out = enhancer.enhance(&png, ImageFormat::Png).unwrap();
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = ImageEnhancer::default()
            .enhance(b"\x89PNG\r\n\x1a\nbroken", ImageFormat::Png)
            .unwrap_err();
        assert!(matches!(err, EnhanceError::Decode(_)));
    }

    #[test]
    fn clahe_stretches_low_contrast_ramp() {
        // 64x64 ramp confined to [100, 131]
        let luma: Vec<u8> = (0..64 * 64).map(|i| 100 + ((i % 64) / 2) as u8).collect();
        let out = clahe(&luma, 64, 64, 2, 4.0);
        let (min, max) = out.iter().fold((u8::MAX, 0), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        assert!(max - min > 31, "range {min}..{max}");
    }

    #[test]
    fn clahe_keeps_uniform_image_stable() {
        let luma = vec![128u8; 16 * 16];
        let out = clahe(&luma, 16, 16, 4, 2.0);
        let first = out[0];
        assert!(out.iter().all(|&v| v == first));
    }

    #[test]
    fn clahe_handles_more_tiles_than_pixels() {
        let luma = vec![10u8, 200, 30];
        assert_eq!(clahe(&luma, 3, 1, 8, 2.0).len(), 3);
    }
}
