//! Synthetic payloads and token builders

use chrono::Utc;
use dtx_core::{
    Fingerprint, ImageFormat, ImageId, MergedToken, ProcessedImage, SourceContribution,
    TokenCandidate, TokenCategory, TokenValue,
};
use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

fn encode(image: &DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), format)
        .unwrap_or_else(|e| panic!("encode {format:?} fixture: {e}"));
    out
}

fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
}

/// Solid-color opaque PNG
#[must_use]
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(&solid_rgb(width, height, color), image::ImageFormat::Png)
}

/// Solid-color PNG with alpha
#[must_use]
pub fn rgba_png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(width, height, Rgba(color)));
    encode(&image, image::ImageFormat::Png)
}

#[must_use]
pub fn gif_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(solid_rgb(width, height, color).to_rgba8());
    encode(&image, image::ImageFormat::Gif)
}

#[must_use]
pub fn jpeg_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(&solid_rgb(width, height, color), image::ImageFormat::Jpeg)
}

/// Lossless WebP
#[must_use]
pub fn webp_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgba8(solid_rgb(width, height, color).to_rgba8());
    encode(&image, image::ImageFormat::WebP)
}

/// Processed image wrapping a tiny PNG
#[must_use]
pub fn processed_image(source: &str) -> ProcessedImage {
    let data = png_bytes(1, 1, [0, 0, 0]);
    ProcessedImage {
        id: ImageId::new(),
        source_url: source.to_string(),
        fingerprint: Fingerprint::of_source(source),
        width: 1,
        height: 1,
        format: ImageFormat::Png,
        byte_size: data.len(),
        created_at: Utc::now(),
        data: Arc::from(data),
    }
}

#[must_use]
pub fn color_candidate(name: &str, hex: &str, confidence: f64, image: ImageId) -> TokenCandidate {
    TokenCandidate::new(TokenCategory::Color, name, hex, confidence, image)
        .with_path(vec!["color".into(), name.into()])
}

#[must_use]
pub fn spacing_candidate(name: &str, px: f64, confidence: f64, image: ImageId) -> TokenCandidate {
    TokenCandidate::new(TokenCategory::Spacing, name, px, confidence, image)
        .with_path(vec!["spacing".into(), name.into()])
}

/// Single-source merged token
#[must_use]
pub fn merged_token(category: TokenCategory, name: &str, value: TokenValue, confidence: f64) -> MergedToken {
    MergedToken {
        category,
        name: name.into(),
        path: vec![category.as_str().into(), name.into()],
        value,
        token_type: Some(category.dtcg_type().into()),
        description: None,
        reference: None,
        extensions: BTreeMap::new(),
        sources: vec![SourceContribution {
            image_id: ImageId::new(),
            confidence,
        }],
        confidence,
    }
}
