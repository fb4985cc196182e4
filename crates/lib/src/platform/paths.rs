use crate::consts::APP_NAME;
use std::env;
use std::path::PathBuf;

fn var_path(name: &str) -> Option<PathBuf> {
  env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  var_path("USERPROFILE")
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  var_path("HOME")
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> Option<PathBuf> {
  var_path("APPDATA").map(|appdata| appdata.join(APP_NAME))
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> Option<PathBuf> {
  let data_home = var_path("XDG_DATA_HOME").or_else(|| home_dir().map(|home| home.join(".local").join("share")))?;
  Some(data_home.join(APP_NAME))
}
