//! cairn-lib: content-addressed package descriptors and their resolution
//!
//! This crate provides the core of a package builder:
//! - `Pkg`: a validated, content-addressed description of one buildable unit
//! - `PkgGraph`: the arena packages live in, with hash-based deduplication
//! - `RefScanner`: finds references to other packages in realized output
//! - `Resolver`: computes closures and build orders from scan results
//! - `realize`: drives an external executor over a closure

pub mod build;
pub mod consts;
pub mod execute;
pub mod pkg;
pub mod platform;
pub mod resolve;
pub mod scan;
pub mod util;

pub use execute::{ExecuteError, RealizeConfig, RealizeResult, realize};
pub use pkg::{Pkg, PkgGraph, PkgId, PkgSpec};
pub use resolve::{Resolution, ResolveError, Resolver, resolve};
pub use scan::{RefScanner, scan};
pub use util::hash::{ContentHash, PkgHash};
