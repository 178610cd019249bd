//! Control-side mixer
//!
//! [`Mixer`] is what application code talks to. It keeps a mirror of the
//! registered sources, turns calls like [`Mixer::play`] into
//! [`MixerCommand`]s for the render thread, and decides when the output
//! device should be running: started when the first source begins playing,
//! stopped when the last one stops or ends.
//!
//! Nothing here runs on the render thread. Playback-ended notifications come
//! back through the event ring and reach listeners from
//! [`Mixer::poll_events`], which the application calls periodically.
//!
//! Nothing drains the command ring while the device is paused. Commands that
//! do not fit wait in a control-side backlog, where later commands for the
//! same source supersede earlier ones, so an idle mixer accepts any number
//! of calls. Effect parameters and bypass skip the queue entirely and go
//! through each effect's [`EffectControls`].

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::Arc;

use basedrop::{Owned, Shared};
use thiserror::Error;

use super::command::{command_channel, event_channel, MixerCommand, SourceEvent};
use super::engine::{MixEngine, MixerStats};
use super::gc::gc_handle;
use super::source::{AudioSource, PlaybackSource, SampleTap, SourceId};
use crate::audio::{AudioConfig, AudioDevice, AudioError, StreamRequest};
use crate::audio_file::{AudioClip, AudioFileError, ChunkStream};
use crate::effect::{Effect, EffectControls, EffectId, SharedControls};

/// Chunk size reported in the per-clip layout log
const LAYOUT_CHUNK_BYTES: usize = 4096;

/// Errors from the mixer control API
#[derive(Error, Debug)]
pub enum MixerError {
    /// The clip could not be opened or parsed; the source stays idle
    #[error(transparent)]
    Clip(#[from] AudioFileError),

    #[error(transparent)]
    Device(#[from] AudioError),

    #[error("Mixer is not initialized")]
    NotInitialized,

    #[error("{0} is not registered with this mixer")]
    UnknownSource(SourceId),

    #[error("Too many sources (max {0})")]
    TooManySources(usize),

    #[error("Effect chain is full (max {0})")]
    EffectChainFull(usize),

    #[error("Effect {0:?} is not attached to this source")]
    UnknownEffect(EffectId),
}

pub type MixerResult<T> = Result<T, MixerError>;

/// Detachable registration made with [`Mixer::on_playback_ended`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type PlaybackEndedListener = Box<dyn FnMut(SourceId)>;

/// Control-side view of one registered source
struct Registration {
    source: AudioSource,
    /// Clip whose stream the voice currently holds
    clip: Option<AudioClip>,
    /// Effects in chain order
    effects: Vec<EffectSlot>,
    has_tap: bool,
}

struct EffectSlot {
    id: EffectId,
    /// Concrete type, for [`Mixer::get_effect`]
    type_id: TypeId,
    controls: SharedControls,
}

/// Mixes registered sources into one stereo output
pub struct Mixer {
    config: AudioConfig,
    commands: rtrb::Producer<MixerCommand>,
    /// Commands waiting for room in the ring, oldest first
    backlog: VecDeque<MixerCommand>,
    events: rtrb::Consumer<SourceEvent>,
    /// Render half, handed to the device by `initialize`
    engine: Option<MixEngine>,
    device: Option<Box<dyn AudioDevice>>,
    device_running: bool,
    sample_rate: u32,
    sources: Vec<Registration>,
    listeners: Vec<(ListenerHandle, PlaybackEndedListener)>,
    next_listener: u64,
    stats: Arc<MixerStats>,
    reported_exhausted: u64,
    reported_dropped: u64,
}

impl Mixer {
    /// Create an uninitialized mixer
    ///
    /// All render-side memory (output block, scratch pool, voice table) is
    /// allocated here.
    pub fn new(config: AudioConfig) -> Self {
        let (commands, command_rx) = command_channel();
        let (event_tx, events) = event_channel();
        let stats = Arc::new(MixerStats::default());

        let engine = MixEngine::new(
            command_rx,
            event_tx,
            config.block_frames(),
            config.scratch_buffers,
            config.max_sources,
            Arc::clone(&stats),
        );

        Self {
            sample_rate: config.sample_rate,
            config,
            commands,
            backlog: VecDeque::new(),
            events,
            engine: Some(engine),
            device: None,
            device_running: false,
            sources: Vec::new(),
            listeners: Vec::new(),
            next_listener: 0,
            stats,
            reported_exhausted: 0,
            reported_dropped: 0,
        }
    }

    /// Open the output device and hand it the render engine
    ///
    /// Returns the negotiated sample rate. The device starts paused. If
    /// opening fails the engine is gone with it and this mixer stays
    /// uninitialized for good; registration becomes a no-op.
    pub fn initialize(&mut self, mut device: Box<dyn AudioDevice>) -> MixerResult<u32> {
        if self.device.is_some() {
            log::warn!("Mixer already initialized");
            return Ok(self.sample_rate);
        }
        let engine = self.engine.take().ok_or(MixerError::NotInitialized)?;

        let request = StreamRequest {
            device: self.config.device.clone(),
            sample_rate: self.config.sample_rate,
            frames_per_callback: self.config.block_frames() as u32,
        };

        match device.open(engine, &request) {
            Ok(sample_rate) => {
                if sample_rate != request.sample_rate {
                    log::warn!(
                        "Requested {}Hz but device runs at {}Hz",
                        request.sample_rate,
                        sample_rate
                    );
                }
                log::info!(
                    "Mixer initialized on '{}' at {}Hz ({:.1}ms per block)",
                    device.name(),
                    sample_rate,
                    self.config.block_latency_ms()
                );
                self.sample_rate = sample_rate;
                self.device = Some(device);
                Ok(sample_rate)
            }
            Err(e) => {
                log::error!("Failed to open audio device: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// Sample rate negotiated with the device (the requested one before that)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Counters updated by the render thread
    pub fn stats(&self) -> &Arc<MixerStats> {
        &self.stats
    }

    // ─────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────

    /// Add a source to the mix
    ///
    /// Returns `false` when the source is already registered or the mixer is
    /// not initialized.
    pub fn register_source(&mut self, source: &AudioSource) -> MixerResult<bool> {
        if !self.is_initialized() {
            log::warn!("Ignoring registration of {}: mixer not initialized", source.id());
            return Ok(false);
        }
        if self.position(source.id()).is_some() {
            return Ok(false);
        }
        if self.sources.len() >= self.config.max_sources {
            return Err(MixerError::TooManySources(self.config.max_sources));
        }

        let voice = PlaybackSource::new(
            source,
            self.config.block_frames(),
            self.config.max_effects_per_source,
        );
        self.send(MixerCommand::Register {
            voice: Owned::new(&gc_handle(), voice),
        });
        self.sources.push(Registration {
            source: source.clone(),
            clip: None,
            effects: Vec::new(),
            has_tap: false,
        });

        log::debug!("Registered {}", source.id());
        Ok(true)
    }

    /// Remove a source from the mix, stopping it first
    pub fn unregister_source(&mut self, source: &AudioSource) -> MixerResult<bool> {
        let Some(index) = self.position(source.id()) else {
            return Ok(false);
        };

        self.send(MixerCommand::Unregister { source: source.id() });
        source.atomics().halt();
        self.sources.remove(index);
        self.request_device_stop();

        log::debug!("Unregistered {}", source.id());
        Ok(true)
    }

    pub fn is_registered(&self, source: &AudioSource) -> bool {
        self.position(source.id()).is_some()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Number of registered sources currently playing
    pub fn playing_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|reg| reg.source.is_playing())
            .count()
    }

    // ─────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────

    /// Play `clip` on `source` from its beginning
    ///
    /// A playing source is stopped first. Replaying the clip the source
    /// already holds rewinds the open stream instead of reopening it. If the
    /// clip cannot be opened the error is returned and the source stays idle.
    pub fn play(&mut self, source: &AudioSource, clip: &AudioClip) -> MixerResult<()> {
        if !self.is_initialized() {
            return Err(MixerError::NotInitialized);
        }
        let id = source.id();
        let index = self.position(id).ok_or(MixerError::UnknownSource(id))?;

        if source.is_playing() {
            self.send(MixerCommand::Stop { source: id });
            source.atomics().halt();
        }

        let reuse = self.sources[index]
            .clip
            .as_ref()
            .is_some_and(|held| held.same_source(clip));

        if reuse {
            let generation = source.atomics().begin();
            self.send(MixerCommand::Restart { source: id, generation });
        } else {
            let stream = match ChunkStream::open(clip) {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Cannot play '{}' on {}: {}", clip.name(), id, e);
                    self.request_device_stop();
                    return Err(e.into());
                }
            };

            let format = *stream.format();
            if format.sample_rate != self.sample_rate {
                log::warn!(
                    "'{}' is {}Hz but the device runs at {}Hz; it will play off-speed",
                    clip.name(),
                    format.sample_rate,
                    self.sample_rate
                );
            }
            let layout = stream.layout(LAYOUT_CHUNK_BYTES);
            log::debug!(
                "'{}': {:?}, {} ch, {}Hz, {} data bytes in {} chunks (last {} bytes)",
                clip.name(),
                format.encoding,
                format.channels,
                format.sample_rate,
                format.data_len,
                layout.total_chunks,
                layout.last_chunk_size
            );

            source.atomics().set_format(format.channels, format.sample_rate);
            let generation = source.atomics().begin();
            self.send(MixerCommand::Play {
                source: id,
                generation,
                stream: Owned::new(&gc_handle(), stream),
            });
            self.sources[index].clip = Some(clip.clone());
        }

        log::info!("Playing '{}' on {}", clip.name(), id);
        self.request_device_start();
        Ok(())
    }

    /// Stop `source` and rewind it; no-op when it is not playing
    pub fn stop(&mut self, source: &AudioSource) -> MixerResult<()> {
        let id = source.id();
        if self.position(id).is_none() || !source.is_playing() {
            return Ok(());
        }

        self.send(MixerCommand::Stop { source: id });
        source.atomics().halt();
        log::debug!("Stopped {}", id);

        self.request_device_stop();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Effects
    // ─────────────────────────────────────────────────────────────

    /// Append an effect to the end of the source's chain
    pub fn add_effect<E: Effect + 'static>(
        &mut self,
        source: &AudioSource,
        effect: E,
    ) -> MixerResult<EffectId> {
        let index = self.registered(source)?;
        let max = self.config.max_effects_per_source;
        if self.sources[index].effects.len() >= max {
            return Err(MixerError::EffectChainFull(max));
        }

        let effect_id = EffectId::next();
        let name = effect.info().name.clone();
        let controls = Shared::new(&gc_handle(), EffectControls::for_effect(&effect));
        let boxed: Box<dyn Effect> = Box::new(effect);
        self.send(MixerCommand::AddEffect {
            source: source.id(),
            effect_id,
            effect: Owned::new(&gc_handle(), boxed),
            controls: Shared::clone(&controls),
        });
        self.sources[index].effects.push(EffectSlot {
            id: effect_id,
            type_id: TypeId::of::<E>(),
            controls,
        });

        log::debug!("Added effect '{}' to {}", name, source.id());
        Ok(effect_id)
    }

    /// First effect of type `E` in the source's chain
    pub fn get_effect<E: Effect + 'static>(&self, source: &AudioSource) -> Option<EffectId> {
        let index = self.position(source.id())?;
        self.sources[index]
            .effects
            .iter()
            .find(|slot| slot.type_id == TypeId::of::<E>())
            .map(|slot| slot.id)
    }

    /// Effect ids in chain order
    pub fn effects(&self, source: &AudioSource) -> Vec<EffectId> {
        self.position(source.id())
            .map(|index| self.sources[index].effects.iter().map(|slot| slot.id).collect())
            .unwrap_or_default()
    }

    /// Remove an effect, keeping the order of the rest
    ///
    /// Returns `false` when the effect was not in the chain.
    pub fn remove_effect(&mut self, source: &AudioSource, effect_id: EffectId) -> MixerResult<bool> {
        let index = self.registered(source)?;
        let Some(slot) = self.effect_slot(index, effect_id) else {
            return Ok(false);
        };

        self.send(MixerCommand::RemoveEffect {
            source: source.id(),
            effect_id,
        });
        self.sources[index].effects.remove(slot);
        Ok(true)
    }

    /// Takes effect at the start of the next render pass
    pub fn set_effect_bypass(
        &self,
        source: &AudioSource,
        effect_id: EffectId,
        bypass: bool,
    ) -> MixerResult<()> {
        self.controls(source, effect_id)?.set_bypass(bypass);
        Ok(())
    }

    /// Set a parameter from a normalized 0.0-1.0 value
    ///
    /// Only the latest value per parameter reaches the render thread.
    /// Indices past the effect's parameter list are ignored.
    pub fn set_effect_param(
        &self,
        source: &AudioSource,
        effect_id: EffectId,
        param: usize,
        value: f32,
    ) -> MixerResult<()> {
        let controls = self.controls(source, effect_id)?;
        if !controls.set_param(param, value) {
            log::debug!("Ignoring parameter {} of effect {:?}", param, effect_id);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────

    /// Install the source's sample tap, replacing any previous one
    ///
    /// The tap runs on the render thread before each block is decoded.
    pub fn attach_sample_tap<T: SampleTap + 'static>(
        &mut self,
        source: &AudioSource,
        tap: T,
    ) -> MixerResult<()> {
        let index = self.registered(source)?;
        let boxed: Box<dyn SampleTap> = Box::new(tap);
        self.send(MixerCommand::AttachTap {
            source: source.id(),
            tap: Owned::new(&gc_handle(), boxed),
        });
        self.sources[index].has_tap = true;
        Ok(())
    }

    /// Remove the source's sample tap; `false` if it had none
    pub fn detach_sample_tap(&mut self, source: &AudioSource) -> MixerResult<bool> {
        let index = self.registered(source)?;
        if !self.sources[index].has_tap {
            return Ok(false);
        }
        self.send(MixerCommand::DetachTap { source: source.id() });
        self.sources[index].has_tap = false;
        Ok(true)
    }

    /// Call `listener` whenever a non-looping source runs out of data
    ///
    /// Listeners run on the thread calling [`poll_events`](Self::poll_events).
    pub fn on_playback_ended<F>(&mut self, listener: F) -> ListenerHandle
    where
        F: FnMut(SourceId) + 'static,
    {
        let handle = ListenerHandle(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((handle, Box::new(listener)));
        handle
    }

    /// Detach a listener; `false` if it was already gone
    pub fn remove_listener(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| *h != handle);
        self.listeners.len() != before
    }

    /// Dispatch render-thread events and apply the device policy
    ///
    /// Returns the number of events handled.
    pub fn poll_events(&mut self) -> usize {
        self.flush_backlog();
        let mut handled = 0;

        while let Ok(event) = self.events.pop() {
            match event {
                SourceEvent::PlaybackEnded { source } => {
                    log::debug!("Playback ended on {}", source);
                    for (_, listener) in self.listeners.iter_mut() {
                        listener(source);
                    }
                }
            }
            handled += 1;
        }

        let exhausted = self.stats.scratch_exhausted();
        if exhausted > self.reported_exhausted {
            log::warn!(
                "Scratch pool exhausted: {} source passes rendered as silence",
                exhausted - self.reported_exhausted
            );
            self.reported_exhausted = exhausted;
        }

        let dropped = self.stats.events_dropped();
        if dropped > self.reported_dropped {
            log::warn!("{} playback events dropped: event queue full", dropped - self.reported_dropped);
            self.reported_dropped = dropped;
        }

        self.request_device_stop();
        handled
    }

    // ─────────────────────────────────────────────────────────────
    // Device policy
    // ─────────────────────────────────────────────────────────────

    /// Start the device if any source is playing and it is not running
    pub fn request_device_start(&mut self) {
        if self.device_running || self.playing_count() == 0 {
            return;
        }
        self.flush_backlog();
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.start() {
            Ok(()) => {
                self.device_running = true;
                log::debug!("Audio device started");
            }
            Err(e) => log::error!("Failed to start audio device: {}", e),
        }
    }

    /// Stop the device if it is running and no source is playing
    pub fn request_device_stop(&mut self) {
        if !self.device_running || self.playing_count() > 0 {
            return;
        }
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.stop() {
            Ok(()) => {
                self.device_running = false;
                log::debug!("Audio device stopped");
            }
            Err(e) => log::error!("Failed to stop audio device: {}", e),
        }
    }

    pub fn is_device_running(&self) -> bool {
        self.device_running
    }

    /// Close the device, then release every source
    pub fn shutdown(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.shutdown();
            log::info!("Mixer shut down");
        }
        self.device_running = false;
        self.backlog.clear();
        for reg in self.sources.drain(..) {
            reg.source.atomics().halt();
        }
        self.listeners.clear();
    }

    // ─────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────

    /// Commands waiting for room in the command ring
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Queue a command for the render thread, in order with earlier ones
    fn send(&mut self, command: MixerCommand) {
        self.flush_backlog();
        if !self.backlog.is_empty() {
            self.defer(command);
            return;
        }
        if let Err(rtrb::PushError::Full(command)) = self.commands.push(command) {
            log::debug!("Command queue full; holding commands until the render thread catches up");
            self.defer(command);
        }
    }

    /// Move backlogged commands into the ring while there is room
    fn flush_backlog(&mut self) {
        while let Some(command) = self.backlog.pop_front() {
            if let Err(rtrb::PushError::Full(command)) = self.commands.push(command) {
                self.backlog.push_front(command);
                break;
            }
        }
    }

    /// Append to the backlog, dropping whatever `command` supersedes
    ///
    /// Only backlogged commands can be folded; whatever already sits in the
    /// ring will reach the render thread. Per source the backlog holds at
    /// most one `Unregister` and `Register` pair, one `Play`, one `Restart`
    /// or `Stop`, one tap change and one entry per chain slot.
    fn defer(&mut self, command: MixerCommand) {
        let id = command.target();
        let backlog = &mut self.backlog;

        match command {
            MixerCommand::Unregister { source } => {
                // A backlogged Register means the render thread never saw the voice
                let never_sent = backlog
                    .iter()
                    .find(|c| c.target() == id)
                    .is_some_and(|c| matches!(c, MixerCommand::Register { .. }));
                backlog.retain(|c| c.target() != id);
                if !never_sent {
                    backlog.push_back(MixerCommand::Unregister { source });
                }
            }
            MixerCommand::Play {
                source,
                generation,
                stream,
            } => {
                backlog.retain(|c| !(c.target() == id && is_transport(c)));
                backlog.push_back(MixerCommand::Play {
                    source,
                    generation,
                    stream,
                });
            }
            MixerCommand::Restart { source, generation } => {
                backlog.retain(|c| !(c.target() == id && is_rewind(c)));
                // A backlogged Play loads its stream from the top anyway
                let queued = backlog.iter_mut().find_map(|c| match c {
                    MixerCommand::Play {
                        source: queued,
                        generation,
                        ..
                    } if *queued == id => Some(generation),
                    _ => None,
                });
                match queued {
                    Some(queued) => *queued = generation,
                    None => backlog.push_back(MixerCommand::Restart { source, generation }),
                }
            }
            MixerCommand::Stop { source } => {
                backlog.retain(|c| !(c.target() == id && is_rewind(c)));
                backlog.push_back(MixerCommand::Stop { source });
            }
            MixerCommand::RemoveEffect { source, effect_id } => {
                let before = backlog.len();
                backlog.retain(|c| {
                    !matches!(c, MixerCommand::AddEffect { effect_id: queued, .. } if *queued == effect_id)
                });
                if backlog.len() == before {
                    backlog.push_back(MixerCommand::RemoveEffect { source, effect_id });
                }
            }
            MixerCommand::AttachTap { source, tap } => {
                backlog.retain(|c| !(c.target() == id && is_tap(c)));
                backlog.push_back(MixerCommand::AttachTap { source, tap });
            }
            MixerCommand::DetachTap { source } => {
                backlog.retain(|c| {
                    !(c.target() == id && matches!(c, MixerCommand::AttachTap { .. }))
                });
                let detaching = backlog
                    .iter()
                    .any(|c| c.target() == id && matches!(c, MixerCommand::DetachTap { .. }));
                if !detaching {
                    backlog.push_back(MixerCommand::DetachTap { source });
                }
            }
            other => backlog.push_back(other),
        }
    }

    fn controls(&self, source: &AudioSource, effect_id: EffectId) -> MixerResult<&EffectControls> {
        let index = self.registered(source)?;
        self.sources[index]
            .effects
            .iter()
            .find(|slot| slot.id == effect_id)
            .map(|slot| &*slot.controls)
            .ok_or(MixerError::UnknownEffect(effect_id))
    }

    fn position(&self, id: SourceId) -> Option<usize> {
        self.sources.iter().position(|reg| reg.source.id() == id)
    }

    fn registered(&self, source: &AudioSource) -> MixerResult<usize> {
        self.position(source.id())
            .ok_or(MixerError::UnknownSource(source.id()))
    }

    fn effect_slot(&self, index: usize, effect_id: EffectId) -> Option<usize> {
        self.sources[index]
            .effects
            .iter()
            .position(|slot| slot.id == effect_id)
    }
}

fn is_transport(command: &MixerCommand) -> bool {
    matches!(
        command,
        MixerCommand::Play { .. } | MixerCommand::Restart { .. } | MixerCommand::Stop { .. }
    )
}

fn is_rewind(command: &MixerCommand) -> bool {
    matches!(command, MixerCommand::Restart { .. } | MixerCommand::Stop { .. })
}

fn is_tap(command: &MixerCommand) -> bool {
    matches!(command, MixerCommand::AttachTap { .. } | MixerCommand::DetachTap { .. })
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OfflineDevice;
    use crate::audio_file::canonical_header;
    use crate::effect::native::distortion::PARAM_BLEND;
    use crate::effect::native::DistortionEffect;
    use crate::types::StereoBuffer;
    use std::cell::RefCell;
    use std::rc::Rc;

    const BLOCK: usize = 64;

    fn float_clip(name: &str, value: f32, frames: usize) -> AudioClip {
        let mut bytes = canonical_header(3, 1, 44100, 32, (frames * 4) as u32).to_vec();
        for _ in 0..frames {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        AudioClip::from_bytes(name, bytes)
    }

    fn mixer() -> (Mixer, OfflineDevice) {
        let config = AudioConfig::default().with_frames_per_callback(BLOCK as u32);
        let device = OfflineDevice::new();
        let mut mixer = Mixer::new(config);
        mixer.initialize(Box::new(device.clone())).unwrap();
        (mixer, device)
    }

    fn registered(mixer: &mut Mixer) -> AudioSource {
        let source = AudioSource::new();
        assert!(mixer.register_source(&source).unwrap());
        source
    }

    #[test]
    fn test_register_requires_initialize() {
        let mut mixer = Mixer::new(AudioConfig::default());
        let source = AudioSource::new();
        assert!(!mixer.register_source(&source).unwrap());
        assert_eq!(mixer.source_count(), 0);
        assert!(matches!(
            mixer.play(&source, &float_clip("a", 0.1, 8)),
            Err(MixerError::NotInitialized)
        ));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let (mut mixer, _device) = mixer();
        let source = registered(&mut mixer);
        assert!(!mixer.register_source(&source).unwrap());
        assert!(!mixer.register_source(&source.clone()).unwrap());
        assert_eq!(mixer.source_count(), 1);
    }

    #[test]
    fn test_register_respects_capacity() {
        let config = AudioConfig::default().with_max_sources(1);
        let mut mixer = Mixer::new(config);
        mixer.initialize(Box::new(OfflineDevice::new())).unwrap();
        registered(&mut mixer);
        assert!(matches!(
            mixer.register_source(&AudioSource::new()),
            Err(MixerError::TooManySources(1))
        ));
    }

    #[test]
    fn test_play_unregistered_source() {
        let (mut mixer, _device) = mixer();
        let source = AudioSource::new();
        assert!(matches!(
            mixer.play(&source, &float_clip("a", 0.1, 8)),
            Err(MixerError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_device_starts_and_stops_once() {
        let (mut mixer, device) = mixer();
        let a = registered(&mut mixer);
        let b = registered(&mut mixer);
        let clip = float_clip("loop", 0.25, BLOCK * 4);
        a.set_looping(true);
        b.set_looping(true);

        mixer.play(&a, &clip).unwrap();
        mixer.play(&b, &clip).unwrap();
        assert_eq!(device.starts(), 1);
        assert!(device.is_running());

        mixer.stop(&a).unwrap();
        assert_eq!(device.stops(), 0);
        mixer.stop(&b).unwrap();
        assert_eq!(device.stops(), 1);
        assert!(!device.is_running());

        // Stopping idle sources does not touch the device again
        mixer.stop(&a).unwrap();
        assert_eq!(device.stops(), 1);
    }

    #[test]
    fn test_device_never_starts_with_nothing_playing() {
        let (mut mixer, device) = mixer();
        registered(&mut mixer);
        mixer.request_device_start();
        mixer.poll_events();
        assert_eq!(device.starts(), 0);
    }

    #[test]
    fn test_play_failure_leaves_source_idle() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        let garbage = AudioClip::from_bytes("garbage", vec![0u8; 100]);

        let result = mixer.play(&source, &garbage);
        assert!(matches!(result, Err(MixerError::Clip(_))));
        assert!(!source.is_playing());
        assert_eq!(device.starts(), 0);
    }

    #[test]
    fn test_play_restarts_running_source() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        let clip = float_clip("tone", 0.5, BLOCK * 8);

        mixer.play(&source, &clip).unwrap();
        device.render_frames(BLOCK * 3);
        assert_eq!(source.playback_frames(), (BLOCK * 3) as u64);

        // Same clip: the held stream is rewound rather than reopened
        mixer.play(&source, &clip).unwrap();
        device.render_frames(BLOCK);
        assert_eq!(source.playback_frames(), BLOCK as u64);
        assert!(source.is_playing());
        assert_eq!(device.starts(), 1);
        assert_eq!(device.stops(), 0);
    }

    #[test]
    fn test_playback_ended_reaches_listener_once() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        let ended = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&ended);
        let handle = mixer.on_playback_ended(move |id| seen.borrow_mut().push(id));

        mixer.play(&source, &float_clip("short", 0.5, BLOCK / 2)).unwrap();
        device.render_frames(BLOCK * 3);

        assert_eq!(mixer.poll_events(), 1);
        assert_eq!(*ended.borrow(), vec![source.id()]);
        assert!(!source.is_playing());
        assert_eq!(device.stops(), 1);

        assert!(mixer.remove_listener(handle));
        assert!(!mixer.remove_listener(handle));
        mixer.play(&source, &float_clip("short", 0.5, BLOCK / 2)).unwrap();
        device.render_frames(BLOCK * 2);
        assert_eq!(mixer.poll_events(), 1);
        assert_eq!(ended.borrow().len(), 1);
    }

    #[test]
    fn test_effects_mirror() {
        let (mut mixer, _device) = mixer();
        let source = registered(&mut mixer);

        assert!(mixer.get_effect::<DistortionEffect>(&source).is_none());
        let id = mixer.add_effect(&source, DistortionEffect::new()).unwrap();
        assert_eq!(mixer.get_effect::<DistortionEffect>(&source), Some(id));
        assert_eq!(mixer.effects(&source), vec![id]);

        mixer.set_effect_bypass(&source, id, true).unwrap();
        mixer.set_effect_param(&source, id, 0, 0.5).unwrap();

        assert!(mixer.remove_effect(&source, id).unwrap());
        assert!(!mixer.remove_effect(&source, id).unwrap());
        assert!(matches!(
            mixer.set_effect_bypass(&source, id, false),
            Err(MixerError::UnknownEffect(_))
        ));
    }

    #[test]
    fn test_effect_chain_capacity() {
        let mut config = AudioConfig::default();
        config.max_effects_per_source = 1;
        let mut mixer = Mixer::new(config);
        mixer.initialize(Box::new(OfflineDevice::new())).unwrap();
        let source = registered(&mut mixer);

        mixer.add_effect(&source, DistortionEffect::new()).unwrap();
        assert!(matches!(
            mixer.add_effect(&source, DistortionEffect::new()),
            Err(MixerError::EffectChainFull(1))
        ));
    }

    struct Preload(f32);

    impl SampleTap for Preload {
        fn on_read(&mut self, buffer: &mut StereoBuffer) {
            for frame in buffer.as_mut_slice().iter_mut() {
                frame.left += self.0;
                frame.right += self.0;
            }
        }
    }

    #[test]
    fn test_sample_tap_attach_detach() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        source.set_looping(true);
        assert!(!mixer.detach_sample_tap(&source).unwrap());

        mixer.attach_sample_tap(&source, Preload(0.25)).unwrap();
        mixer.play(&source, &float_clip("tone", 0.25, BLOCK)).unwrap();
        let out = device.render_frames(BLOCK);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));

        assert!(mixer.detach_sample_tap(&source).unwrap());
        let out = device.render_frames(BLOCK);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_unregister_stops_device() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        source.set_looping(true);
        mixer.play(&source, &float_clip("tone", 0.1, BLOCK)).unwrap();

        assert!(mixer.unregister_source(&source).unwrap());
        assert!(!source.is_playing());
        assert_eq!(device.stops(), 1);
        assert!(!mixer.unregister_source(&source).unwrap());
    }

    #[test]
    fn test_shutdown_closes_device() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        source.set_looping(true);
        mixer.play(&source, &float_clip("tone", 0.1, BLOCK)).unwrap();

        mixer.shutdown();
        assert!(!device.is_open());
        assert!(!mixer.is_initialized());
        assert!(!source.is_playing());
    }

    #[test]
    fn test_idle_param_changes_never_fill_the_queue() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        let distortion = mixer.add_effect(&source, DistortionEffect::new()).unwrap();

        for step in 0..2000 {
            let value = step as f32 / 2000.0;
            mixer.set_effect_param(&source, distortion, PARAM_BLEND, value).unwrap();
            mixer.set_effect_bypass(&source, distortion, step % 2 == 0).unwrap();
        }
        mixer.set_effect_param(&source, distortion, PARAM_BLEND, 0.0).unwrap();
        mixer.set_effect_bypass(&source, distortion, false).unwrap();
        assert_eq!(mixer.backlog_len(), 0);

        mixer.play(&source, &float_clip("tone", 0.5, BLOCK * 4)).unwrap();
        assert_eq!(device.starts(), 1);

        // Blend 0 is the clean signal through the shaper's output stage
        let out = device.render_frames(BLOCK);
        assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-3));
    }

    #[test]
    fn test_idle_register_cycles_stay_bounded() {
        let (mut mixer, device) = mixer();
        for _ in 0..2000 {
            let transient = registered(&mut mixer);
            assert!(mixer.unregister_source(&transient).unwrap());
        }
        assert_eq!(mixer.source_count(), 0);
        assert_eq!(mixer.backlog_len(), 0);

        let source = registered(&mut mixer);
        source.set_looping(true);
        mixer.play(&source, &float_clip("tone", 0.5, BLOCK)).unwrap();
        assert!(mixer.backlog_len() <= 2);
        assert!(device.is_running());

        // The first pass works through the ring; the backlog follows
        device.render_frames(BLOCK);
        mixer.poll_events();
        assert_eq!(mixer.backlog_len(), 0);
        let out = device.render_frames(BLOCK);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_stop_behind_full_queue_stays_consistent() {
        let (mut mixer, device) = mixer();
        let source = registered(&mut mixer);
        let clip = float_clip("tone", 0.5, BLOCK * 3);
        mixer.play(&source, &clip).unwrap();
        device.render_frames(BLOCK);

        // Nothing renders while these go out, so the ring fills up
        for _ in 0..1500 {
            mixer.attach_sample_tap(&source, Preload(0.0)).unwrap();
        }
        assert!(mixer.backlog_len() >= 1);

        mixer.stop(&source).unwrap();
        assert!(!source.is_playing());
        assert_eq!(mixer.playing_count(), 0);
        assert!(!device.is_running());

        mixer.play(&source, &clip).unwrap();
        assert!(source.is_playing());
        assert!(mixer.backlog_len() <= 2);

        device.render_frames(BLOCK);
        mixer.poll_events();
        assert_eq!(mixer.backlog_len(), 0);

        // Rewound by the replay: three full blocks, then the end
        for _ in 0..3 {
            let out = device.render_frames(BLOCK);
            assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
        }
        assert!(source.is_playing());
        device.render_frames(BLOCK);
        assert_eq!(mixer.poll_events(), 1);
        assert!(!source.is_playing());
        assert!(!device.is_running());
    }
}
