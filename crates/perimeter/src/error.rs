//! Error types for the perimeter crate.
//!
//! These are configuration-time failures: they are raised while the perimeter
//! is being assembled and abort startup. Request-time denials are expressed as
//! [`crate::containment::ContainmentError`] values or plain `bool`/`Option`
//! results instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to build one of the perimeter components.
#[derive(Debug, Error)]
pub enum PerimeterError {
    // Network access errors
    /// An address range did not have the `address/prefix` shape.
    #[error("invalid CIDR notation '{input}': expected <ipv4>/<prefix>")]
    MalformedRange {
        /// The offending text.
        input: String,
    },

    /// The address part of a range is not an IPv4 address.
    #[error("invalid CIDR '{input}': '{address}' is not an IPv4 address")]
    InvalidRangeAddress {
        /// The offending text.
        input: String,
        /// The address portion.
        address: String,
    },

    /// The prefix length is not an integer in `0..=32`.
    #[error("invalid CIDR '{input}': prefix length must be between 0 and 32")]
    InvalidPrefixLength {
        /// The offending text.
        input: String,
    },

    // Token errors
    /// A configured capability token is unusable.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    // Containment errors
    /// The containment root does not exist or is not a directory.
    #[error("containment root {path} is not an existing directory")]
    RootNotDirectory {
        /// The configured path.
        path: PathBuf,
    },

    /// A derived sub-area resolves outside its parent root.
    #[error("area {path} resolves outside its parent root")]
    AreaOutsideParent {
        /// The resolved sub-area path.
        path: PathBuf,
    },

    /// IO error while resolving a root.
    #[error("failed to resolve {path}: {source}")]
    Io {
        /// Path being resolved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for perimeter construction.
pub type Result<T> = std::result::Result<T, PerimeterError>;
