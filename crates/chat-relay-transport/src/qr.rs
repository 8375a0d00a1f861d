//! QR payload rendering.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use qrcode::{QrCode, render::svg};
use thiserror::Error;

/// Smallest rendered edge, in pixels.
const MIN_DIMENSION: u32 = 256;

/// QR rendering error.
#[derive(Debug, Error)]
#[error("QR generation failed: {0}")]
pub struct QrError(#[from] qrcode::types::QrError);

/// Render a pairing payload as an SVG document.
///
/// # Errors
/// Returns error if the payload does not fit in a QR code.
pub fn render_svg(payload: &str) -> Result<String, QrError> {
    Ok(QrCode::new(payload.as_bytes())?
        .render::<svg::Color<'_>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build())
}

/// Render a pairing payload as a `data:` URL usable as an `<img>` source.
///
/// # Errors
/// Returns error if the payload does not fit in a QR code.
pub fn render_data_url(payload: &str) -> Result<String, QrError> {
    let svg = render_svg(payload)?;
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        BASE64.encode(svg.as_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_wraps_svg() {
        let url = render_data_url("2@pairing-ref,key,secret").unwrap();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_oversized_payload_fails() {
        let payload = "x".repeat(8_000);
        assert!(render_data_url(&payload).is_err());
    }
}
