//! Host directory conventions.

pub mod paths;
