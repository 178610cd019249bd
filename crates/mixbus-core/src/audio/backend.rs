//! Output device abstraction
//!
//! The mixer drives its output through [`AudioDevice`]: it hands the device a
//! [`MixEngine`] once, then only toggles it on and off. Whatever thread the
//! device pulls audio on owns the engine exclusively.
//!
//! - [`CpalDevice`](super::CpalDevice) plays through a system output
//! - [`OfflineDevice`] renders on demand, for file export and tests

use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::MixEngine;
use crate::types::Sample;

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// What the mixer asks of a device when opening it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Specific output, or the host default
    pub device: Option<DeviceId>,
    pub sample_rate: u32,
    pub frames_per_callback: u32,
}

/// A stereo output that pulls audio from a [`MixEngine`]
pub trait AudioDevice {
    /// Negotiate a stream and take ownership of the engine
    ///
    /// The stream must come up paused. Returns the sample rate actually
    /// obtained, which may differ from the requested one.
    fn open(&mut self, engine: MixEngine, request: &StreamRequest) -> AudioResult<u32>;

    /// Resume pulling audio
    fn start(&mut self) -> AudioResult<()>;

    /// Pause pulling audio
    fn stop(&mut self) -> AudioResult<()>;

    /// Close the stream and drop the engine
    fn shutdown(&mut self);

    /// Human-readable device name
    fn name(&self) -> &str;
}

#[derive(Default)]
struct OfflineState {
    engine: Option<MixEngine>,
    sample_rate: u32,
    running: bool,
    starts: usize,
    stops: usize,
}

/// Device that renders only when asked
///
/// Clones share the same stream, so one clone can be handed to the mixer
/// while another pulls audio out of it. While stopped, or before open, every
/// render produces silence and the engine is left untouched.
#[derive(Clone, Default)]
pub struct OfflineDevice {
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fill `data` with interleaved output for `channels` channels
    ///
    /// Returns whether the device was running.
    pub fn render(&self, data: &mut [Sample], channels: usize) -> bool {
        let mut state = self.lock();
        let running = state.running;
        match state.engine.as_mut() {
            Some(engine) if running => engine.fill_interleaved(data, channels),
            _ => data.fill(0.0),
        }
        running
    }

    /// Render `frames` interleaved stereo frames into a new vector
    pub fn render_frames(&self, frames: usize) -> Vec<Sample> {
        let mut out = vec![0.0; frames * 2];
        self.render(&mut out, 2);
        out
    }

    /// Whether the stream is open
    pub fn is_open(&self) -> bool {
        self.lock().engine.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Sample rate agreed at open, 0 before
    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    /// Number of stopped → running transitions so far
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    /// Number of running → stopped transitions so far
    pub fn stops(&self) -> usize {
        self.lock().stops
    }
}

impl AudioDevice for OfflineDevice {
    fn open(&mut self, engine: MixEngine, request: &StreamRequest) -> AudioResult<u32> {
        let mut state = self.lock();
        state.engine = Some(engine);
        state.sample_rate = request.sample_rate;
        state.running = false;
        log::debug!(
            "Offline device opened at {}Hz, {} frames per pass",
            request.sample_rate,
            request.frames_per_callback
        );
        Ok(request.sample_rate)
    }

    fn start(&mut self) -> AudioResult<()> {
        let mut state = self.lock();
        if state.engine.is_none() {
            return Err(AudioError::NotOpen);
        }
        if !state.running {
            state.running = true;
            state.starts += 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        let mut state = self.lock();
        if state.engine.is_none() {
            return Err(AudioError::NotOpen);
        }
        if state.running {
            state.running = false;
            state.stops += 1;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.lock();
        state.running = false;
        state.engine = None;
    }

    fn name(&self) -> &str {
        "offline"
    }
}
