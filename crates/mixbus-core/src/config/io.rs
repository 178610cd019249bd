//! YAML configuration I/O
//!
//! Loading never fails: a missing or unreadable file yields the type's
//! default and a log line. Saving reports errors with context.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load `T` from a YAML file, falling back to `T::default()`
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("No config at {:?}, using defaults", path);
            return T::default();
        }
        Err(e) => {
            log::warn!("Failed to read config {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Failed to parse config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save `config` as YAML, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioConfig, DeviceId};

    #[test]
    fn test_missing_file_gives_defaults() {
        let config: AudioConfig = load_config(Path::new("/nonexistent/mixbus/config.yaml"));
        assert_eq!(config, AudioConfig::default());
    }

    #[test]
    fn test_invalid_yaml_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "sample_rate: [not a number").unwrap();

        let config: AudioConfig = load_config(&path);
        assert_eq!(config, AudioConfig::default());
    }

    #[test]
    fn test_roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("player.yaml");

        let config = AudioConfig::default()
            .with_device(DeviceId::with_host("hw:1,0", "ALSA"))
            .with_sample_rate(48000)
            .with_frames_per_callback(256);

        save_config(&config, &path).unwrap();
        let loaded: AudioConfig = load_config(&path);

        assert_eq!(loaded, config);
    }
}
