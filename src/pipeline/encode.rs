//! Base64 helpers: embedded images and the bundled source document.
//!
//! Embedded images become `data:` URIs so a note renders with no network
//! access; the study kit carries its source document the same way. Both use
//! the standard alphabet with padding, which every Markdown renderer and
//! browser accepts.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Wrap raw bytes in a `data:` URI.
pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} → {} bytes base64", mime, b64.len());
    format!("data:{mime};base64,{b64}")
}

/// MIME type sniffed from the image header, if it is a known format.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64, ignoring line breaks inserted for readability.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([0, 128, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn data_uri_shape() {
        let uri = data_uri(b"abc", "image/gif");
        assert_eq!(uri, "data:image/gif;base64,YWJj");
    }

    #[test]
    fn sniffs_png() {
        assert_eq!(sniff_image_mime(&png_bytes()), Some("image/png"));
        assert_eq!(sniff_image_mime(b"<html>"), None);
    }

    #[test]
    fn decode_tolerates_wrapping() {
        let encoded = encode_base64(&png_bytes());
        let wrapped: String = encoded
            .as_bytes()
            .chunks(10)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(decode_base64(&wrapped).unwrap(), png_bytes());
    }
}
