//! # LanShare Perimeter Library
//!
//! This crate holds the checks every LanShare request passes before any
//! file operation runs.
//!
//! ## Overview
//!
//! - **Network Access Control**: IPv4 CIDR allow list with loopback bypass
//! - **Capability Token Gate**: random URL token, compared in constant time
//! - **Path Containment**: keeps client paths inside an exposed directory,
//!   including through symbolic links
//! - **Session Lifecycle**: TTL and idle limits that end the share exactly once
//!
//! ## Request Flow
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │  AllowList   │──▶│  TokenGate   │──▶│ record_activity  │──▶│ handler          │
//! │ (client IP)  │   │ (/<token>/…) │   │ (idle clock)     │   │  └ Containment-  │
//! └──────────────┘   └──────────────┘   └──────────────────┘   │    Validator     │
//!                                                              └──────────────────┘
//!        SessionLifecycle timers ──▶ CancellationToken ──▶ server shutdown
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use perimeter::{AllowList, CapabilityToken, TokenGate};
//!
//! let allow = AllowList::parse(Some("192.168.1.0/24")).unwrap();
//! assert!(allow.is_allowed(Some("192.168.1.20".parse().unwrap())));
//! assert!(!allow.is_allowed(Some("10.1.1.1".parse().unwrap())));
//!
//! let gate = TokenGate::new(CapabilityToken::new("abc123").unwrap());
//! assert_eq!(gate.validate_path("/abc123/dl?path=x"), Some("/dl?path=x"));
//! ```
//!
//! ## Modules
//!
//! - [`access`]: Address ranges and the allow list
//! - [`token`]: Capability token generation and validation
//! - [`containment`]: Path containment validation
//! - [`lifecycle`]: Session TTL and idle supervision
//! - [`error`]: Configuration-time error types

pub mod access;
pub mod containment;
pub mod error;
pub mod lifecycle;
pub mod token;

pub use access::{AddressRange, AllowList};
pub use containment::{ContainmentError, ContainmentPolicy, ContainmentRoot, ContainmentValidator};
pub use error::{PerimeterError, Result};
pub use lifecycle::{LifecycleState, LifecycleTimers, SessionLifecycle, StopReason};
pub use token::{CapabilityToken, TokenGate};
