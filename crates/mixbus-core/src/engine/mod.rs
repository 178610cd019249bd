//! Mixing engine
//!
//! Split in two halves that never share mutable state:
//!
//! - [`Mixer`] on the control thread: registration, play/stop, effects,
//!   listeners and the device start/stop policy
//! - [`MixEngine`] on the render thread, owned by the output device: applies
//!   queued commands, mixes every playing [`PlaybackSource`] and reports
//!   end-of-stream back
//!
//! Per-source scalars that both sides read (playing, volume, looping,
//! position) live in [`SourceAtomics`].

mod command;
#[allow(clippy::module_inception)]
mod engine;
mod gc;
mod mixer;
mod pool;
mod source;

pub use command::{command_channel, event_channel, MixerCommand, SourceEvent};
pub use engine::{MixEngine, MixerStats};
pub use gc::gc_handle;
pub use mixer::{ListenerHandle, Mixer, MixerError, MixerResult};
pub use pool::{ScratchBuffer, ScratchPool};
pub use source::{AudioSource, FillOutcome, PlaybackSource, SampleTap, SourceAtomics, SourceId};
