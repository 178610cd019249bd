//! cpal output device
//!
//! The output callback owns the [`MixEngine`] outright. Nothing is shared
//! with the control thread except the engine's lock-free queues, so the
//! callback never takes a lock.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use crate::engine::MixEngine;

use super::backend::{AudioDevice, StreamRequest};
use super::config::{DeviceId, MAX_FRAMES_PER_CALLBACK};
use super::device::{find_device_by_id, get_default_device};
use super::error::{AudioError, AudioResult};

/// Output through a cpal device
///
/// Defaults to the host's default output unless a device is named either
/// here or in the [`StreamRequest`].
pub struct CpalDevice {
    preferred: Option<DeviceId>,
    stream: Option<Stream>,
    name: String,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            preferred: None,
            stream: None,
            name: String::from("cpal"),
        }
    }

    /// Use a specific device instead of the configured one
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.preferred = Some(device);
        self
    }

    fn stream(&self) -> AudioResult<&Stream> {
        self.stream.as_ref().ok_or(AudioError::NotOpen)
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for CpalDevice {
    fn open(&mut self, mut engine: MixEngine, request: &StreamRequest) -> AudioResult<u32> {
        let device = match self.preferred.as_ref().or(request.device.as_ref()) {
            Some(id) => find_device_by_id(id)?,
            None => get_default_device()?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = get_output_config(&device, request.sample_rate)?;
        let frames = request.frames_per_callback.clamp(16, MAX_FRAMES_PER_CALLBACK);
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: CpalBufferSize::Fixed(frames),
        };
        let channels = config.channels as usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    engine.fill_interleaved(data, channels);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        // Some hosts start streams on build; the mixer starts it on first play
        if let Err(e) = stream.pause() {
            log::debug!("Could not pause freshly built stream: {}", e);
        }

        log::info!(
            "Audio output opened on '{}': {}Hz, {} channels, {} frames per callback",
            device_name,
            config.sample_rate.0,
            config.channels,
            frames
        );

        self.name = device_name;
        self.stream = Some(stream);
        Ok(config.sample_rate.0)
    }

    fn start(&mut self) -> AudioResult<()> {
        self.stream()?
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.stream()?
            .pause()
            .map_err(|e| AudioError::StreamPauseError(e.to_string()))
    }

    fn shutdown(&mut self) {
        if self.stream.take().is_some() {
            log::info!("Audio output '{}' closed", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Pick an f32 stereo configuration, at the target rate when supported
///
/// Falls back to any stereo configuration, then to anything at all. A
/// device that cannot do the target rate runs at its maximum rate instead.
fn get_output_config(
    device: &cpal::Device,
    target_sample_rate: u32,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let best_config = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| {
            target_sample_rate >= c.min_sample_rate().0
                && target_sample_rate <= c.max_sample_rate().0
        })
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
        })
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32)
        })
        .ok_or_else(|| {
            AudioError::UnsupportedFormat("device offers no f32 output configuration".to_string())
        })?;

    let sample_rate = if target_sample_rate >= best_config.min_sample_rate().0
        && target_sample_rate <= best_config.max_sample_rate().0
    {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    Ok(best_config.clone().with_sample_rate(sample_rate))
}
