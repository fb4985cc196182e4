//! Dependency resolution.
//!
//! Computes the closure of a set of roots and an order to build it in. The
//! closure is only final once the output of every package with extra
//! references has been scanned, so resolution is incremental: a [`Resolver`]
//! is fed scan results as builds finish and reports what is still pending.
//!
//! # Submodules
//!
//! - [`dag`] - petgraph view of a resolution for wave scheduling
//! - `resolver` - closure traversal and scan confirmation
//! - `types` - results and errors

pub mod dag;
mod resolver;
mod types;

pub use dag::BuildDag;
pub use resolver::{Resolver, resolve};
pub use types::*;
