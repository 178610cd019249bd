//! Render-side mixing engine
//!
//! [`MixEngine`] is owned by the audio device callback. Each pass:
//!
//! 1. apply pending [`MixerCommand`]s
//! 2. zero the output block
//! 3. for every active voice: check out a scratch buffer, zero it, fill it,
//!    run the voice's effects, sum it into the output, give it back
//! 4. hard-clamp the output to `[-1.0, 1.0]`
//!
//! Nothing here allocates, blocks or logs. Voices that cannot get a scratch
//! buffer are silent for the pass and counted in [`MixerStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use basedrop::Owned;

use super::command::{MixerCommand, SourceEvent};
use super::pool::ScratchPool;
use super::source::{FillOutcome, PlaybackSource, SourceId};
use crate::types::{Sample, StereoBuffer};

/// Counters published by the render thread
#[derive(Debug, Default)]
pub struct MixerStats {
    /// Completed render passes
    renders: AtomicU64,
    /// Voice passes skipped because the scratch pool was empty
    scratch_exhausted: AtomicU64,
    /// End-of-playback events dropped because the event queue was full
    events_dropped: AtomicU64,
}

impl MixerStats {
    pub fn renders(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    pub fn scratch_exhausted(&self) -> u64 {
        self.scratch_exhausted.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

/// The render half of a mixer
pub struct MixEngine {
    commands: rtrb::Consumer<MixerCommand>,
    events: rtrb::Producer<SourceEvent>,
    voices: Vec<Owned<PlaybackSource>>,
    pool: ScratchPool,
    output: StereoBuffer,
    /// Next unread frame of `output` for [`MixEngine::fill_interleaved`]
    cursor: usize,
    stats: Arc<MixerStats>,
}

impl MixEngine {
    pub(crate) fn new(
        commands: rtrb::Consumer<MixerCommand>,
        events: rtrb::Producer<SourceEvent>,
        block_frames: usize,
        scratch_buffers: usize,
        max_sources: usize,
        stats: Arc<MixerStats>,
    ) -> Self {
        Self {
            commands,
            events,
            voices: Vec::with_capacity(max_sources),
            pool: ScratchPool::new(scratch_buffers, block_frames),
            output: StereoBuffer::silence(block_frames),
            cursor: block_frames,
            stats,
        }
    }

    /// Frames produced per [`render`](Self::render)
    pub fn block_frames(&self) -> usize {
        self.output.len()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Render one block and return it
    pub fn render(&mut self) -> &StereoBuffer {
        self.process_commands();
        self.output.fill_silence();

        for voice in self.voices.iter_mut() {
            if !voice.is_active() {
                continue;
            }

            let Some(mut scratch) = self.pool.checkout() else {
                self.stats.scratch_exhausted.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            scratch.fill_silence();
            let outcome = voice.fill_frames(&mut scratch);
            voice.effects_mut().process(&mut scratch);
            self.output.add_buffer(&scratch);
            self.pool.give_back(scratch);

            if let FillOutcome::Ended { generation } = outcome {
                if voice.atomics().finish(generation) {
                    let event = SourceEvent::PlaybackEnded { source: voice.id() };
                    if self.events.push(event).is_err() {
                        self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        self.output.clamp_unit();
        self.stats.renders.fetch_add(1, Ordering::Relaxed);
        &self.output
    }

    /// Fill an interleaved device buffer of any length
    ///
    /// Renders whole blocks as needed and carries leftover frames into the
    /// next call, so device buffers need not match the block size. The first
    /// two device channels get left/right; extra channels are silenced.
    pub fn fill_interleaved(&mut self, data: &mut [Sample], channels: usize) {
        if channels == 0 {
            return;
        }

        for frame in data.chunks_mut(channels) {
            if self.cursor >= self.output.len() {
                self.render();
                self.cursor = 0;
            }

            let sample = self.output[self.cursor];
            self.cursor += 1;

            frame[0] = sample.left;
            if let Some(right) = frame.get_mut(1) {
                *right = sample.right;
            }
            for extra in frame.iter_mut().skip(2) {
                *extra = 0.0;
            }
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn voice_mut(&mut self, source: SourceId) -> Option<&mut PlaybackSource> {
        self.voices
            .iter_mut()
            .find(|voice| voice.id() == source)
            .map(|voice| &mut **voice)
    }

    /// Apply one command
    ///
    /// Payloads addressed to an unknown source fall out of scope here and
    /// are released by the collector.
    fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::Register { voice } => {
                let id = voice.id();
                let duplicate = self.voices.iter().any(|v| v.id() == id);
                if !duplicate && self.voices.len() < self.voices.capacity() {
                    self.voices.push(voice);
                }
            }
            MixerCommand::Unregister { source } => {
                if let Some(index) = self.voices.iter().position(|v| v.id() == source) {
                    // Order-preserving; the removed voice is dropped by the collector
                    self.voices.remove(index);
                }
            }
            MixerCommand::Play {
                source,
                generation,
                stream,
            } => {
                if let Some(voice) = self.voice_mut(source) {
                    voice.load(stream, generation);
                }
            }
            MixerCommand::Restart { source, generation } => {
                if let Some(voice) = self.voice_mut(source) {
                    voice.restart(generation);
                }
            }
            MixerCommand::Stop { source } => {
                if let Some(voice) = self.voice_mut(source) {
                    voice.halt();
                }
            }
            MixerCommand::AddEffect {
                source,
                effect_id,
                effect,
                controls,
            } => {
                if let Some(voice) = self.voice_mut(source) {
                    // Chain capacity is enforced on the control side
                    let _ = voice.effects_mut().push(effect_id, effect, controls);
                }
            }
            MixerCommand::RemoveEffect { source, effect_id } => {
                if let Some(voice) = self.voice_mut(source) {
                    voice.effects_mut().remove(effect_id);
                }
            }
            MixerCommand::AttachTap { source, tap } => {
                if let Some(voice) = self.voice_mut(source) {
                    voice.set_tap(Some(tap));
                }
            }
            MixerCommand::DetachTap { source } => {
                if let Some(voice) = self.voice_mut(source) {
                    voice.set_tap(None);
                }
            }
        }
    }
}
