//! Standard locations for mixbus configuration files

use std::path::PathBuf;

/// Directory holding mixbus configuration
///
/// Returns the platform config dir joined with `mixbus`
/// (e.g. `~/.config/mixbus` on Linux), or `./mixbus` when the platform
/// has no config dir.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixbus")
}

/// Path of a named config file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
