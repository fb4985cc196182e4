//! Package descriptors.
//!
//! A package is one buildable unit: an optional builder, an optional name and
//! expected output hash, and three ordered lists of references to other
//! packages. Packages live in a [`PkgGraph`] arena and are content-addressed
//! bottom-up by the hash engine.
//!
//! # Submodules
//!
//! - [`graph`] - arena, hash assignment, path recording
//! - [`hash`] - content-address derivation
//! - [`record`] - persisted form (records and bundles)
//! - [`validate`] - structural checks

pub mod graph;
pub mod hash;
pub mod record;
mod types;
pub mod validate;

pub use graph::{PathError, PkgGraph};
pub use hash::{HashError, derive_hash};
pub use record::{PkgBundle, PkgRecord, RecordError};
pub use types::*;
pub use validate::{PkgName, ValidationError};
