//! Capability token authentication.
//!
//! Every share URL carries the token as its first path segment:
//! `http://host:port/<token>/...`. The [`TokenGate`] checks that segment in
//! constant time and hands back the remainder of the path for routing.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{PerimeterError, Result};

/// Number of random bytes in a generated token (144 bits).
pub const TOKEN_BYTES: usize = 18;

/// Length of a generated token once encoded.
pub const TOKEN_LENGTH: usize = 24;

/// Opaque URL-safe capability string.
///
/// `Debug` and `Display` show only a redacted prefix; use
/// [`as_str`](Self::as_str) where the full value is needed.
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityToken(String);

impl CapabilityToken {
    /// Generate a fresh token from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an operator-supplied token.
    ///
    /// The token must be non-empty and made only of URL-unreserved
    /// characters so it can sit in a path segment unescaped.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(PerimeterError::InvalidToken("token is empty".to_string()));
        }
        if let Some(c) = token
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')))
        {
            return Err(PerimeterError::InvalidToken(format!(
                "character {c:?} is not allowed in a URL path segment"
            )));
        }
        Ok(Self(token))
    }

    /// The full token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short form safe to print in logs.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapabilityToken").field(&self.redacted()).finish()
    }
}

impl fmt::Display for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Checks the token segment of incoming request paths.
#[derive(Debug, Clone)]
pub struct TokenGate {
    token: CapabilityToken,
}

impl TokenGate {
    /// Create a gate for the given token.
    pub fn new(token: CapabilityToken) -> Self {
        Self { token }
    }

    /// The token this gate accepts.
    pub fn token(&self) -> &CapabilityToken {
        &self.token
    }

    /// The path prefix clients must use, `/<token>/`.
    pub fn share_path(&self) -> String {
        format!("/{}/", self.token.as_str())
    }

    /// Validate `path` and strip the token segment.
    ///
    /// Returns the remaining path (always starting with `/`) when the first
    /// segment equals the token, or `None` otherwise.
    ///
    /// ```
    /// use perimeter::{CapabilityToken, TokenGate};
    ///
    /// let gate = TokenGate::new(CapabilityToken::new("abc123").unwrap());
    /// assert_eq!(gate.validate_path("/abc123/dl?path=x"), Some("/dl?path=x"));
    /// assert_eq!(gate.validate_path("/abc123"), Some("/"));
    /// assert_eq!(gate.validate_path("/abc124/dl"), None);
    /// ```
    pub fn validate_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix('/')?;
        let (candidate, remaining) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        if constant_time_eq(candidate.as_bytes(), self.token.as_str().as_bytes()) {
            Some(remaining)
        } else {
            None
        }
    }
}

/// Compare `candidate` against `expected` without early exit.
///
/// The loop always runs over the full length of `expected`, whatever the
/// candidate's length, and the length difference is folded into the same
/// accumulator, so timing depends only on the configured token.
fn constant_time_eq(candidate: &[u8], expected: &[u8]) -> bool {
    let mut diff = (candidate.len() ^ expected.len()) as u64;
    for (i, &e) in expected.iter().enumerate() {
        let c = candidate.get(i).copied().unwrap_or(!e);
        diff |= u64::from(c ^ e);
    }
    std::hint::black_box(diff) == 0
}
