//! Audio engine configuration
//!
//! Sizes fixed for the lifetime of a mixer: the callback block, the scratch
//! pool and the render-side capacities. All of them are allocated up front so
//! the render path never grows a collection.

use serde::{Deserialize, Serialize};

/// Default sample rate requested from the device
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default render block in frames (4096 bytes of interleaved stereo f32)
pub const DEFAULT_FRAMES_PER_CALLBACK: u32 = 512;

/// Largest render block accepted
pub const MAX_FRAMES_PER_CALLBACK: u32 = 8192;

/// Default number of scratch buffers
pub const DEFAULT_SCRATCH_BUFFERS: usize = 10;

/// Default cap on registered sources
pub const DEFAULT_MAX_SOURCES: usize = 64;

/// Default cap on effects per source
pub const DEFAULT_MAX_EFFECTS_PER_SOURCE: usize = 8;

/// Audio device identifier
///
/// The host is optional; without it every available host is searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g. "ALSA", "JACK", "CoreAudio")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: Some(host.into()),
        }
    }

    /// Display label including the host when known
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the mixer and its output device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    /// Requested sample rate; the device may negotiate another one
    pub sample_rate: u32,
    /// Frames rendered per mixer pass
    pub frames_per_callback: u32,
    /// Scratch buffers available to a single mix pass
    pub scratch_buffers: usize,
    /// Maximum number of registered sources
    pub max_sources: usize,
    /// Maximum effects per source
    pub max_effects_per_source: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_callback: DEFAULT_FRAMES_PER_CALLBACK,
            scratch_buffers: DEFAULT_SCRATCH_BUFFERS,
            max_sources: DEFAULT_MAX_SOURCES,
            max_effects_per_source: DEFAULT_MAX_EFFECTS_PER_SOURCE,
        }
    }
}

impl AudioConfig {
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_frames_per_callback(mut self, frames: u32) -> Self {
        self.frames_per_callback = frames;
        self
    }

    pub fn with_scratch_buffers(mut self, count: usize) -> Self {
        self.scratch_buffers = count;
        self
    }

    pub fn with_max_sources(mut self, count: usize) -> Self {
        self.max_sources = count;
        self
    }

    /// Render block clamped to the supported range
    pub fn block_frames(&self) -> usize {
        self.frames_per_callback.clamp(16, MAX_FRAMES_PER_CALLBACK) as usize
    }

    /// Latency of one render block in milliseconds
    pub fn block_latency_ms(&self) -> f32 {
        (self.block_frames() as f32 / self.sample_rate.max(1) as f32) * 1000.0
    }
}
