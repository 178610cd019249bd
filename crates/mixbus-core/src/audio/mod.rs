//! Audio output: configuration, device abstraction and the cpal backend

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;

pub use backend::{AudioDevice, OfflineDevice, StreamRequest};
pub use config::{
    AudioConfig, DeviceId, DEFAULT_FRAMES_PER_CALLBACK, DEFAULT_MAX_EFFECTS_PER_SOURCE,
    DEFAULT_MAX_SOURCES, DEFAULT_SAMPLE_RATE, DEFAULT_SCRATCH_BUFFERS, MAX_FRAMES_PER_CALLBACK,
};
pub use cpal_backend::CpalDevice;
pub use device::{find_device_by_id, get_default_device, get_output_devices, OutputDeviceInfo};
pub use error::{AudioError, AudioResult};
