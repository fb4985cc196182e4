//! Crate-wide constants.

pub const APP_NAME: &str = "cairn";

/// Width of a package content address in characters.
pub const PKG_HASH_LEN: usize = 32;

/// Width of an output content hash (full SHA-256, hex).
pub const CONTENT_HASH_LEN: usize = 64;

/// Maximum length of a package name in bytes.
pub const PKG_NAME_MAX_LEN: usize = 64;

/// Byte that may not appear in a package name.
pub const PATH_SEPARATOR: u8 = b'/';

/// Prefix mixed into every package hash so the canonical encoding can evolve.
pub const PKG_HASH_DOMAIN: &str = "cairn-pkg-v1";

/// Environment variable overriding the store root.
pub const STORE_ENV: &str = "CAIRN_STORE";

/// Read size used when streaming build outputs through the scanner.
pub const SCAN_BLOCK_SIZE: usize = 64 * 1024;

/// Version written into persisted bundles.
pub const BUNDLE_VERSION: u32 = 1;
