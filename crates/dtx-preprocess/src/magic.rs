//! Magic-byte verification
//!
//! The declared content type is only a hint; the leading bytes decide.

use crate::error::MagicError;
use dtx_core::ImageFormat;

/// Bytes inspected for a signature
pub const SNIFF_LEN: usize = 2048;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87: &[u8] = b"GIF87a";
const GIF89: &[u8] = b"GIF89a";

/// Detect a supported format from the leading bytes
#[must_use]
pub fn detect_format(buffer: &[u8]) -> Option<ImageFormat> {
    let head = &buffer[..buffer.len().min(SNIFF_LEN)];
    if head.starts_with(PNG) {
        Some(ImageFormat::Png)
    } else if head.starts_with(JPEG) {
        Some(ImageFormat::Jpeg)
    } else if head.starts_with(GIF87) || head.starts_with(GIF89) {
        Some(ImageFormat::Gif)
    } else if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        Some(ImageFormat::Webp)
    } else {
        None
    }
}

/// Verify the payload is a supported image and matches the declared format
///
/// # Errors
/// - [`MagicError::Empty`] for an empty buffer
/// - [`MagicError::UnknownSignature`] when no supported signature matches
/// - [`MagicError::Mismatch`] when the bytes contradict `declared`
pub fn validate_magic_bytes(
    buffer: &[u8],
    declared: Option<ImageFormat>,
) -> Result<ImageFormat, MagicError> {
    if buffer.is_empty() {
        return Err(MagicError::Empty);
    }
    let detected = detect_format(buffer).ok_or(MagicError::UnknownSignature)?;
    match declared {
        Some(declared) if declared != detected => Err(MagicError::Mismatch { declared, detected }),
        _ => Ok(detected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn detects_each_supported_signature() {
        assert_eq!(detect_format(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some(ImageFormat::Png));
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Some(ImageFormat::Jpeg));
        assert_eq!(detect_format(b"GIF89a\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(detect_format(b"RIFF\x24\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
    }

    #[test]
    fn html_claiming_png_is_rejected() {
        let body = b"<!DOCTYPE html><html><body>not an image</body></html>";
        assert_eq!(
            validate_magic_bytes(body, Some(ImageFormat::Png)),
            Err(MagicError::UnknownSignature)
        );
    }

    #[test]
    fn declared_type_mismatch_is_rejected() {
        let gif = b"GIF89a\x01\x00\x01\x00";
        assert_eq!(
            validate_magic_bytes(gif, Some(ImageFormat::Png)),
            Err(MagicError::Mismatch {
                declared: ImageFormat::Png,
                detected: ImageFormat::Gif,
            })
        );
        assert_eq!(validate_magic_bytes(gif, Some(ImageFormat::Gif)), Ok(ImageFormat::Gif));
    }

    #[test]
    fn truncated_riff_is_not_webp() {
        assert_eq!(detect_format(b"RIFF\0\0"), None);
        assert_eq!(validate_magic_bytes(&[], None), Err(MagicError::Empty));
    }

    proptest! {
        #[test]
        fn bytes_without_a_signature_always_reject(
            body in proptest::collection::vec(any::<u8>(), 1..512),
            declared in prop_oneof![
                Just(ImageFormat::Png),
                Just(ImageFormat::Jpeg),
                Just(ImageFormat::Gif),
                Just(ImageFormat::Webp),
            ],
        ) {
            prop_assume!(detect_format(&body).is_none());
            prop_assert!(validate_magic_bytes(&body, Some(declared)).is_err());
        }

        #[test]
        fn png_signature_wins_over_declared_jpeg(tail in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut body = PNG.to_vec();
            body.extend(tail);
            prop_assert_eq!(
                validate_magic_bytes(&body, Some(ImageFormat::Jpeg)),
                Err(MagicError::Mismatch { declared: ImageFormat::Jpeg, detected: ImageFormat::Png })
            );
        }
    }
}
