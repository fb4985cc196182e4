//! The boundary to whatever actually runs builders.
//!
//! This crate never executes a builder itself. A [`BuildExecutor`] receives a
//! [`BuildRequest`] per package and reports where the output ended up; the
//! realization driver then verifies and scans that output.
//!
//! # Submodules
//!
//! - [`store`] - store layout for realized packages
//! - [`verify`] - fixed-output verification against `out-hash`

pub mod store;
mod types;
pub mod verify;

pub use types::*;
pub use verify::{VerifyError, verify_output};
