//! Pairing code rendering.

use std::io::Cursor;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::{EcLevel, QrCode, render::unicode},
    thiserror::Error,
};

/// Minimum edge of the stored PNG, in pixels.
pub const QR_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("code does not fit in a QR symbol: {0}")]
    Encode(String),

    #[error("png encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

fn symbol(code: &str) -> Result<QrCode, QrError> {
    QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)
        .map_err(|e| QrError::Encode(e.to_string()))
}

/// The code as a `data:image/png;base64,...` URL.
pub fn png_data_url(code: &str) -> Result<String, QrError> {
    let img = symbol(code)?
        .render::<Luma<u8>>()
        .min_dimensions(QR_SIZE, QR_SIZE)
        .build();
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img).write_to(&mut png, ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(png.into_inner())
    ))
}

/// Half-block rendering for a terminal.
pub fn render_console(code: &str) -> Result<String, QrError> {
    Ok(symbol(code)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
