//! Integration tests for cairn-lib.

mod bundle_tests;
mod common;
mod realize_tests;
