//! Path utilities for the HORUS plugin cache.

use crate::error::{PluginError, PluginResult};
use std::path::PathBuf;

/// Get the user's home directory or return an error.
pub fn home_dir() -> PluginResult<PathBuf> {
    dirs::home_dir().ok_or(PluginError::NoHomeDir)
}

/// Get `~/.horus`, the global HORUS directory.
pub fn horus_dir() -> PluginResult<PathBuf> {
    let dir = home_dir()?.join(".horus");
    log::debug!("horus dir: {:?}", dir);
    Ok(dir)
}

/// Get `~/.horus/plugins`, the default plugin cache.
pub fn plugins_dir() -> PluginResult<PathBuf> {
    Ok(horus_dir()?.join("plugins"))
}

/// Directory holding the running executable, with symlinks resolved.
pub fn current_exe_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe = exe.canonicalize().ok()?;
    exe.parent().map(|p| p.to_path_buf())
}
