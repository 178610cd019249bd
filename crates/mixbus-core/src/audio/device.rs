//! Output device enumeration
//!
//! Devices are listed from every available cpal host (ALSA, JACK,
//! PulseAudio, WASAPI, CoreAudio...) so a configured [`DeviceId`] can name
//! any of them.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Sample rates checked when describing a device
const PROBE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Human-readable name for a host
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|host_id| host_name(*host_id) == name)
        .and_then(|host_id| cpal::host_from_id(host_id).ok())
}

/// An output device as seen by the user
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    /// Identifier to put in the config
    pub id: DeviceId,
    pub name: String,
    /// Host backend name, e.g. "ALSA"
    pub host: String,
    /// Default output of its host
    pub is_default: bool,
    /// Common rates within the supported ranges
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for OutputDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        Ok(())
    }
}

/// List output devices from all hosts, defaults first
pub fn get_output_devices() -> AudioResult<Vec<OutputDeviceInfo>> {
    let mut all_devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };

        let host_label = host_name(host_id);
        let default_name = host
            .default_output_device()
            .and_then(|d: cpal::Device| d.name().ok());

        let devices = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            let configs: Vec<_> = match device.supported_output_configs() {
                Ok(c) => c.collect(),
                Err(_) => continue,
            };
            if configs.is_empty() {
                continue;
            }

            let mut sample_rates = Vec::new();
            let mut max_channels = 0;
            for config in &configs {
                max_channels = max_channels.max(config.channels());
                for rate in PROBE_RATES {
                    if rate >= config.min_sample_rate().0
                        && rate <= config.max_sample_rate().0
                        && !sample_rates.contains(&rate)
                    {
                        sample_rates.push(rate);
                    }
                }
            }
            sample_rates.sort_unstable();

            all_devices.push(OutputDeviceInfo {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                sample_rates,
                max_channels,
            });
        }
    }

    if all_devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    all_devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });

    log::info!("Enumerated {} audio output devices", all_devices.len());
    Ok(all_devices)
}

/// Find a device by its ID
///
/// Searches the ID's host when it names one, otherwise every host.
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(host) = id.host.as_deref().and_then(get_host_by_name) {
        return host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut devices) = host.output_devices() else {
            continue;
        };
        if let Some(device) = devices.find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name)) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(id.display_label()))
}

/// Default output of the default host
pub fn get_default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}
