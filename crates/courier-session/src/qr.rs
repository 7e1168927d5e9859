//! Rendering for QR auth challenges.
//!
//! The provider hands back an opaque QR payload while a session sits in
//! AwaitingQr; these helpers turn it into something an operator can scan —
//! a compact terminal string or PNG bytes for whatever surface displays it.

use courier_core::CourierError;
use qrcode::{Color, EcLevel, QrCode};

/// Render a QR payload for terminal display using Unicode half-block
/// characters, packing two module rows per text line.
pub fn qr_terminal(payload: &str) -> Result<String, CourierError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| CourierError::SessionStart(format!("QR render failed: {e}")))?;

    let width = code.width();
    let modules: Vec<Color> = code.into_colors();
    let dark = |row: usize, col: usize| {
        row < width && col < width && modules[row * width + col] == Color::Dark
    };

    let mut out = String::new();
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Render a QR payload as PNG bytes.
pub fn qr_png(payload: &str) -> Result<Vec<u8>, CourierError> {
    use image::{ImageBuffer, Luma};

    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| CourierError::SessionStart(format!("QR render failed: {e}")))?;

    const MODULE_PX: u32 = 8;
    const QUIET_ZONE: u32 = 2;
    let modules = code.width() as u32;
    let size = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let mx = x / MODULE_PX;
        let my = y / MODULE_PX;
        let inside = mx >= QUIET_ZONE
            && my >= QUIET_ZONE
            && mx < modules + QUIET_ZONE
            && my < modules + QUIET_ZONE;
        if inside
            && code[((mx - QUIET_ZONE) as usize, (my - QUIET_ZONE) as usize)] == Color::Dark
        {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| CourierError::SessionStart(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}
