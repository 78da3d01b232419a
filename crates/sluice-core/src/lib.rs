//! sluice-core — wire format, integrity digest, and configuration.
//! All other Sluice crates depend on this one.

pub mod config;
pub mod crypto;
pub mod wire;

pub use wire::{Frame, FrameKind, WireError};
