//! Terminal output for the share: the startup banner and the QR code of
//! the share URL.

pub mod banner;
pub mod qr;

pub use banner::{Banner, TokenOrigin};
pub use qr::generate_terminal_qr;
