//! QR code rendering of the share URL.
//!
//! Phones on the same LAN can scan the code from the terminal instead of
//! typing a 24-character token.

use qrcode::{Color, QrCode};

/// Width of the light border around the code, in modules.
const QUIET_ZONE: usize = 2;

/// Renders `url` as a QR code using Unicode half blocks.
///
/// Each output character covers two vertically stacked modules:
/// - Upper half block (U+2580): top dark, bottom light
/// - Lower half block (U+2584): top light, bottom dark
/// - Full block (U+2588): both dark
/// - Space: both light
///
/// # Errors
/// Returns an error if the URL is too long to encode.
pub fn generate_terminal_qr(url: &str) -> anyhow::Result<String> {
    let code = QrCode::new(url.as_bytes())?;
    let modules = code.to_colors();
    let width = code.width();
    let height = modules.len() / width;

    let is_dark = |row: usize, col: usize| -> bool {
        row < height && modules[row * width + col] == Color::Dark
    };

    let full_width = width + QUIET_ZONE * 2;
    let border_line = " ".repeat(full_width);
    let margin = " ".repeat(QUIET_ZONE);

    let mut output = String::new();
    for _ in 0..QUIET_ZONE / 2 {
        output.push_str(&border_line);
        output.push('\n');
    }

    for row in (0..height).step_by(2) {
        output.push_str(&margin);
        for col in 0..width {
            let ch = match (is_dark(row, col), is_dark(row + 1, col)) {
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
                (false, false) => ' ',
            };
            output.push(ch);
        }
        output.push_str(&margin);
        output.push('\n');
    }

    for _ in 0..QUIET_ZONE / 2 {
        output.push_str(&border_line);
        output.push('\n');
    }

    Ok(output)
}
