//! # manifold-core
//!
//! Foundational types shared by the manifold I/O reactor crates:
//! - Error taxonomy (`ReactorError`, `ReactorResult`)
//! - The monotonic reactor status machine (`ReactorStatus`, `StatusCell`)
//! - Prefix-scoped environment overrides (`EnvPrefix`)
//! - Leveled logging macros (`rerror!` .. `rtrace!`)
//!
//! This crate performs no I/O of its own.

pub mod env;
pub mod error;
pub mod rlog;
pub mod status;

pub use error::{ReactorError, ReactorResult};
pub use status::{ReactorStatus, StatusCell};
