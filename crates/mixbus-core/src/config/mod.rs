//! Configuration files for mixbus applications
//!
//! YAML load/save for any serde type plus the standard config location.
//!
//! ```ignore
//! use mixbus_core::config::{default_config_path, load_config, save_config};
//! use mixbus_core::audio::AudioConfig;
//!
//! let path = default_config_path("player.yaml");
//! let config: AudioConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};
