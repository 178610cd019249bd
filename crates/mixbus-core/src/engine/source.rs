//! Playback sources
//!
//! A source is split in two halves:
//!
//! - [`AudioSource`] is the control-side handle. It is cheap to clone and
//!   exposes playback state through [`SourceAtomics`] without locks.
//! - [`PlaybackSource`] is the render-side voice. It is created on the
//!   control thread, moved to the render thread through the command queue
//!   and from then on touched only by the render thread. It owns the open
//!   [`ChunkStream`], the effect chain and the raw chunk buffer.
//!
//! ```text
//!  control thread                       render thread
//! ┌──────────────┐  MixerCommand   ┌───────────────────┐
//! │ AudioSource  │────────────────►│  PlaybackSource   │
//! └──────┬───────┘                 └─────────┬─────────┘
//!        │   Arc<SourceAtomics>              │
//!        └──────────► playing/volume ◄───────┘
//!                     loop/frames
//! ```
//!
//! Every play and stop bumps a generation counter packed next to the playing
//! bit. The render thread ends playback with a compare-exchange against the
//! generation it was started with, so a natural end that races a newer
//! `play` is ignored.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use basedrop::Owned;

use crate::audio_file::{decode_sample, ChunkStream};
use crate::audio::DEFAULT_SAMPLE_RATE;
use crate::effect::EffectChain;
use crate::types::{StereoBuffer, StereoSample};

/// Largest encoded frame: two channels of 32-bit samples
const MAX_FRAME_BYTES: usize = 8;

/// Identity of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Lock-free playback state shared between a source's two halves
pub struct SourceAtomics {
    /// `generation << 1 | playing`
    state: AtomicU64,
    /// Volume as `f32` bits, never negative
    volume: AtomicU32,
    looping: AtomicBool,
    /// Decoded frames since the last play, stop, wrap or end
    frames: AtomicU64,
    /// Channel count of the loaded clip (0 = nothing loaded)
    channels: AtomicU16,
    /// Sample rate of the loaded clip (0 = nothing loaded)
    sample_rate: AtomicU32,
}

impl SourceAtomics {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            volume: AtomicU32::new(1.0f32.to_bits()),
            looping: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            channels: AtomicU16::new(0),
            sample_rate: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state.load(Ordering::Acquire) & 1 == 1
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.state.load(Ordering::Acquire) >> 1
    }

    /// Enter a new playing generation and return it (control thread)
    pub fn begin(&self) -> u64 {
        let previous = self.bump(true);
        self.frames.store(0, Ordering::Relaxed);
        (previous >> 1) + 1
    }

    /// Enter a new stopped generation (control thread)
    pub fn halt(&self) {
        self.bump(false);
        self.frames.store(0, Ordering::Relaxed);
    }

    /// Clear the playing bit if `generation` is still current (render thread)
    ///
    /// Returns whether this call ended playback.
    pub fn finish(&self, generation: u64) -> bool {
        self.state
            .compare_exchange(
                (generation << 1) | 1,
                generation << 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn bump(&self, playing: bool) -> u64 {
        let next = |state: u64| Some((((state >> 1) + 1) << 1) | playing as u64);
        match self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, next) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Store a volume, clamped to >= 0 (NaN becomes 0)
    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    #[inline]
    fn reset_frames(&self) {
        self.frames.store(0, Ordering::Relaxed);
    }

    #[inline]
    fn advance_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn set_format(&self, channels: u16, sample_rate: u32) {
        self.channels.store(channels, Ordering::Relaxed);
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }
}

impl Default for SourceAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-side handle to a source
///
/// Clones refer to the same source. Volume and looping take effect on the
/// next render pass; play and stop go through the [`Mixer`](super::Mixer).
#[derive(Clone)]
pub struct AudioSource {
    id: SourceId,
    atomics: Arc<SourceAtomics>,
}

impl AudioSource {
    pub fn new() -> Self {
        Self {
            id: SourceId::next(),
            atomics: Arc::new(SourceAtomics::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn atomics(&self) -> &Arc<SourceAtomics> {
        &self.atomics
    }

    pub fn is_playing(&self) -> bool {
        self.atomics.is_playing()
    }

    pub fn volume(&self) -> f32 {
        self.atomics.volume()
    }

    /// Set the volume; negative values are clamped to 0
    pub fn set_volume(&self, volume: f32) {
        self.atomics.set_volume(volume);
    }

    pub fn is_looping(&self) -> bool {
        self.atomics.is_looping()
    }

    pub fn set_looping(&self, looping: bool) {
        self.atomics.set_looping(looping);
    }

    /// Decoded frames since the last play, stop, loop wrap or end
    pub fn playback_frames(&self) -> u64 {
        self.atomics.frames()
    }

    /// Channel count of the loaded clip, 2 when nothing is loaded
    pub fn channels(&self) -> u16 {
        match self.atomics.channels.load(Ordering::Relaxed) {
            0 => 2,
            channels => channels,
        }
    }

    /// Sample rate of the loaded clip, the default rate when nothing is loaded
    pub fn sample_rate(&self) -> u32 {
        match self.atomics.sample_rate.load(Ordering::Relaxed) {
            0 => DEFAULT_SAMPLE_RATE,
            rate => rate,
        }
    }

    /// Seconds of audio played since the last reset
    pub fn playback_time(&self) -> f64 {
        self.playback_frames() as f64 / self.sample_rate() as f64
    }
}

impl Default for AudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("id", &self.id)
            .field("playing", &self.is_playing())
            .field("volume", &self.volume())
            .field("looping", &self.is_looping())
            .finish()
    }
}

/// Pre-populates a source's buffer before decoded samples are added
///
/// Runs on the render thread once per pass of a playing source, on the
/// zeroed scratch buffer. Must not allocate or block.
pub trait SampleTap: Send {
    fn on_read(&mut self, buffer: &mut StereoBuffer);
}

/// Result of one [`PlaybackSource::fill_frames`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Nothing loaded or not active; buffer untouched
    Idle,
    /// Frames were produced and the source keeps playing
    Playing,
    /// Data ran out on a non-looping source started in `generation`
    Ended { generation: u64 },
}

/// Render-side voice for one source
pub struct PlaybackSource {
    id: SourceId,
    atomics: Arc<SourceAtomics>,
    stream: Option<Owned<ChunkStream>>,
    generation: u64,
    active: bool,
    /// Raw bytes of one chunk, sized for the largest frame at full block
    raw: Vec<u8>,
    effects: EffectChain,
    tap: Option<Owned<Box<dyn SampleTap>>>,
}

impl PlaybackSource {
    /// Build the voice for `source` on the control thread
    pub fn new(source: &AudioSource, block_frames: usize, max_effects: usize) -> Self {
        Self {
            id: source.id,
            atomics: Arc::clone(&source.atomics),
            stream: None,
            generation: 0,
            active: false,
            raw: vec![0; block_frames * MAX_FRAME_BYTES],
            effects: EffectChain::with_capacity(max_effects),
            tap: None,
        }
    }

    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    #[inline]
    pub fn atomics(&self) -> &SourceAtomics {
        &self.atomics
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn effects(&self) -> &EffectChain {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectChain {
        &mut self.effects
    }

    /// Start playing a freshly opened stream
    ///
    /// The previous stream, if any, is retired to the collector thread.
    pub fn load(&mut self, stream: Owned<ChunkStream>, generation: u64) {
        self.stream = Some(stream);
        self.generation = generation;
        self.active = true;
        self.effects.reset();
        self.atomics.reset_frames();
    }

    /// Replay the current stream from the top
    pub fn restart(&mut self, generation: u64) {
        self.generation = generation;
        self.effects.reset();
        self.active = match self.stream.as_deref_mut() {
            Some(stream) => {
                stream.seek_to_data_start();
                true
            }
            None => false,
        };
        self.atomics.reset_frames();
    }

    /// Stop and rewind to the start of data
    pub fn halt(&mut self) {
        self.active = false;
        if let Some(stream) = self.stream.as_deref_mut() {
            stream.seek_to_data_start();
        }
        self.atomics.reset_frames();
    }

    /// Install a tap, returning the one it replaces
    pub fn set_tap(
        &mut self,
        tap: Option<Owned<Box<dyn SampleTap>>>,
    ) -> Option<Owned<Box<dyn SampleTap>>> {
        std::mem::replace(&mut self.tap, tap)
    }

    /// Produce one block of stereo frames into `dst`
    ///
    /// Decoded samples are scaled by volume and added to `dst`. Mono samples
    /// become one duplicated stereo frame each, so the number of frames
    /// produced is the same for mono and stereo clips.
    ///
    /// At end of data a looping source rewinds and keeps filling; any other
    /// source zeroes the rest of `dst`, rewinds, deactivates and reports
    /// [`FillOutcome::Ended`].
    pub fn fill_frames(&mut self, dst: &mut StereoBuffer) -> FillOutcome {
        if !self.active {
            return FillOutcome::Idle;
        }
        let Some(stream) = self.stream.as_deref_mut() else {
            self.active = false;
            return FillOutcome::Idle;
        };

        if let Some(tap) = self.tap.as_deref_mut() {
            tap.on_read(dst);
        }

        let format = *stream.format();
        let sample_bytes = format.bytes_per_sample as usize;
        let frame_bytes = format.frame_bytes();
        let frames = dst.len().min(self.raw.len() / frame_bytes);
        let wanted = frames * frame_bytes;
        let raw = &mut self.raw[..wanted];

        let mut read = stream.read_chunk(raw);
        // Bytes read before the most recent wrap don't count toward the frame counter
        let mut counted_from = 0;
        let mut ended = false;

        if read < wanted {
            if self.atomics.is_looping() {
                while read < wanted {
                    stream.seek_to_data_start();
                    self.atomics.reset_frames();
                    counted_from = read;

                    let n = stream.read_chunk(&mut raw[read..]);
                    if n == 0 {
                        // Empty data region
                        break;
                    }
                    read += n;
                }
            } else {
                ended = true;
            }
        }

        let volume = self.atomics.volume();
        let encoding = format.encoding;
        let bits = format.bits_per_sample;
        let decoded = read / frame_bytes;
        let out = dst.as_mut_slice();

        if format.channels == 1 {
            for (i, frame) in out[..decoded].iter_mut().enumerate() {
                let value = decode_sample(encoding, raw, i * sample_bytes, bits);
                *frame += StereoSample::mono(value * volume);
            }
        } else {
            for (i, frame) in out[..decoded].iter_mut().enumerate() {
                let offset = i * frame_bytes;
                let left = decode_sample(encoding, raw, offset, bits);
                let right = decode_sample(encoding, raw, offset + sample_bytes, bits);
                *frame += StereoSample::new(left, right) * volume;
            }
        }

        if ended {
            out[decoded..].fill(StereoSample::silence());
            self.active = false;
            stream.seek_to_data_start();
            self.atomics.reset_frames();
            return FillOutcome::Ended {
                generation: self.generation,
            };
        }

        self.atomics
            .advance_frames(((read - counted_from) / frame_bytes) as u64);
        FillOutcome::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::{canonical_header, AudioClip};
    use crate::effect::{Effect, EffectBase, EffectControls, EffectId, EffectInfo, ParamValue};
    use crate::engine::gc_handle;
    use basedrop::Shared;
    use std::sync::atomic::AtomicUsize;

    fn pcm16_clip(channels: u16, samples: &[i16]) -> AudioClip {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut bytes = canonical_header(1, channels, 44100, 16, data.len() as u32).to_vec();
        bytes.extend_from_slice(&data);
        AudioClip::from_bytes("pcm16", bytes)
    }

    /// Mono 8-bit clip in the given format (1 = unsigned PCM, 6 = A-law, 7 = µ-law)
    fn byte_clip(format_tag: u16, bytes: &[u8]) -> AudioClip {
        let mut data = canonical_header(format_tag, 1, 44100, 8, bytes.len() as u32).to_vec();
        data.extend_from_slice(bytes);
        AudioClip::from_bytes("8-bit", data)
    }

    fn voice_for(clip: &AudioClip, block: usize) -> (AudioSource, PlaybackSource) {
        let source = AudioSource::new();
        let mut voice = PlaybackSource::new(&source, block, 4);
        let stream = ChunkStream::open(clip).unwrap();
        let generation = source.atomics().begin();
        voice.load(Owned::new(&gc_handle(), stream), generation);
        (source, voice)
    }

    #[test]
    fn test_volume_clamped_non_negative() {
        let source = AudioSource::new();
        source.set_volume(-0.5);
        assert_eq!(source.volume(), 0.0);
        source.set_volume(f32::NAN);
        assert_eq!(source.volume(), 0.0);
        source.set_volume(0.75);
        assert_eq!(source.volume(), 0.75);
    }

    #[test]
    fn test_generation_guards_finish() {
        let atomics = SourceAtomics::new();
        let first = atomics.begin();
        assert!(atomics.is_playing());

        // A stop + play supersedes the first generation
        atomics.halt();
        let second = atomics.begin();
        assert!(second > first);
        assert!(!atomics.finish(first));
        assert!(atomics.is_playing());

        assert!(atomics.finish(second));
        assert!(!atomics.is_playing());
        assert!(!atomics.finish(second), "finish only succeeds once");
    }

    #[test]
    fn test_defaults_without_clip() {
        let source = AudioSource::new();
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 44100);
        assert!(!source.is_playing());
        assert_ne!(source.id(), AudioSource::new().id());
    }

    #[test]
    fn test_mono_duplicates_into_both_channels() {
        let samples: Vec<i16> = (0..40).map(|i| (i * 700 - 14000) as i16).collect();
        let clip = pcm16_clip(1, &samples);

        for block in [1usize, 7, 16, 64] {
            let (_source, mut voice) = voice_for(&clip, block);
            let mut buffer = StereoBuffer::silence(block);
            voice.fill_frames(&mut buffer);

            for frame in buffer.iter() {
                assert_eq!(frame.left, frame.right);
            }
            assert!((buffer[0].left - (-14000.0 / 32767.0)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_mono_pcm8_decodes_unsigned() {
        let clip = byte_clip(1, &[0, 128, 255, 64]);
        let (_source, mut voice) = voice_for(&clip, 4);
        let mut buffer = StereoBuffer::silence(4);

        assert_eq!(voice.fill_frames(&mut buffer), FillOutcome::Playing);
        let expected = [-1.0, 128.0 / 255.0 * 2.0 - 1.0, 1.0, 64.0 / 255.0 * 2.0 - 1.0];
        for (frame, want) in buffer.iter().zip(expected) {
            assert_eq!(frame.left, frame.right);
            assert!((frame.left - want).abs() < 1e-6, "{} != {}", frame.left, want);
        }
    }

    #[test]
    fn test_mono_companded_formats_decode() {
        let clip = byte_clip(7, &[0x80, 0x00, 0xFF]);
        let (_source, mut voice) = voice_for(&clip, 3);
        let mut buffer = StereoBuffer::silence(3);
        voice.fill_frames(&mut buffer);
        assert!((buffer[0].left - 32124.0 / 32768.0).abs() < 1e-6);
        assert!((buffer[1].right + 32124.0 / 32768.0).abs() < 1e-6);
        assert_eq!(buffer[2], StereoSample::silence());

        let clip = byte_clip(6, &[0xD5, 0x55, 0xAA]);
        let (_source, mut voice) = voice_for(&clip, 3);
        let mut buffer = StereoBuffer::silence(3);
        voice.fill_frames(&mut buffer);
        assert!((buffer[0].left - 8.0 / 32768.0).abs() < 1e-6);
        assert!((buffer[1].left + 8.0 / 32768.0).abs() < 1e-6);
        assert!((buffer[2].right - 32256.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_passes_through() {
        let clip = pcm16_clip(2, &[16384, -16384, 8192, -8192]);
        let (_source, mut voice) = voice_for(&clip, 2);
        let mut buffer = StereoBuffer::silence(2);

        assert_eq!(voice.fill_frames(&mut buffer), FillOutcome::Playing);
        assert!((buffer[0].left - 0.5).abs() < 1e-3);
        assert!((buffer[0].right + 0.5).abs() < 1e-3);
        assert!((buffer[1].left - 0.25).abs() < 1e-3);
        assert!((buffer[1].right + 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_decoded_samples_are_added_and_scaled() {
        let clip = pcm16_clip(1, &[16384; 4]);
        let (source, mut voice) = voice_for(&clip, 4);
        source.set_volume(0.5);

        let mut buffer = StereoBuffer::silence(4);
        buffer[0] = StereoSample::mono(0.1);
        voice.fill_frames(&mut buffer);

        assert!((buffer[0].left - 0.35).abs() < 1e-3);
        assert!((buffer[1].left - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_looping_short_clip_never_silent() {
        // 3 frames of data, 8-frame blocks
        let clip = pcm16_clip(1, &[8000, 9000, 10000]);
        let (source, mut voice) = voice_for(&clip, 8);
        source.set_looping(true);

        for _ in 0..20 {
            let mut buffer = StereoBuffer::silence(8);
            assert_eq!(voice.fill_frames(&mut buffer), FillOutcome::Playing);
            assert!(buffer.iter().all(|f| f.left > 0.2));
            assert!(voice.is_active());
        }
        // Counter restarts at every wrap, so it never exceeds the clip length
        assert!(source.playback_frames() <= 3);
    }

    #[test]
    fn test_non_looping_ends_once_with_zeroed_tail() {
        let clip = pcm16_clip(1, &[16384; 5]);
        let (source, mut voice) = voice_for(&clip, 4);
        let generation = source.atomics().generation();

        let mut buffer = StereoBuffer::silence(4);
        assert_eq!(voice.fill_frames(&mut buffer), FillOutcome::Playing);
        assert_eq!(source.playback_frames(), 4);

        let mut buffer = StereoBuffer::silence(4);
        buffer.as_interleaved_mut().fill(0.9);
        assert_eq!(voice.fill_frames(&mut buffer), FillOutcome::Ended { generation });
        assert!((buffer[0].left - 1.4).abs() < 1e-3, "partial data still decoded");
        assert!(buffer.as_slice()[1..].iter().all(|f| *f == StereoSample::silence()));
        assert_eq!(source.playback_frames(), 0);

        let mut buffer = StereoBuffer::silence(4);
        assert_eq!(voice.fill_frames(&mut buffer), FillOutcome::Idle);
        assert_eq!(buffer.peak(), 0.0);
    }

    #[test]
    fn test_restart_rewinds() {
        let clip = pcm16_clip(1, &[1000, 2000, 3000, 4000]);
        let (source, mut voice) = voice_for(&clip, 2);

        let mut buffer = StereoBuffer::silence(2);
        voice.fill_frames(&mut buffer);
        voice.halt();
        assert!(!voice.is_active());

        voice.restart(source.atomics().begin());
        let mut buffer = StereoBuffer::silence(2);
        voice.fill_frames(&mut buffer);
        assert!((buffer[0].left - 1000.0 / 32767.0).abs() < 1e-5);
    }

    /// Counts `reset` calls
    struct ResetCounter {
        base: EffectBase,
        resets: Arc<AtomicUsize>,
    }

    impl Effect for ResetCounter {
        fn process(&mut self, _buffer: &mut StereoBuffer) {}
        fn info(&self) -> &EffectInfo {
            self.base.info()
        }
        fn get_params(&self) -> &[ParamValue] {
            self.base.get_params()
        }
        fn set_param(&mut self, index: usize, value: f32) {
            self.base.set_param(index, value);
        }
        fn set_bypass(&mut self, bypass: bool) {
            self.base.set_bypass(bypass);
        }
        fn is_bypassed(&self) -> bool {
            self.base.is_bypassed()
        }
        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_restart_clears_effect_state() {
        let clip = pcm16_clip(1, &[1000; 8]);
        let (source, mut voice) = voice_for(&clip, 2);
        let resets = Arc::new(AtomicUsize::new(0));
        let effect: Box<dyn Effect> = Box::new(ResetCounter {
            base: EffectBase::new(EffectInfo::new("Counter", "Test")),
            resets: Arc::clone(&resets),
        });
        let handle = gc_handle();
        assert!(voice
            .effects_mut()
            .push(
                EffectId::next(),
                Owned::new(&handle, effect),
                Shared::new(&handle, EffectControls::new(0)),
            )
            .is_ok());

        let mut buffer = StereoBuffer::silence(2);
        voice.fill_frames(&mut buffer);
        voice.restart(source.atomics().begin());
        assert_eq!(resets.load(Ordering::Relaxed), 1);

        let stream = ChunkStream::open(&clip).unwrap();
        voice.load(Owned::new(&handle, stream), source.atomics().begin());
        assert_eq!(resets.load(Ordering::Relaxed), 2);
    }

    struct ConstantTap(f32);

    impl SampleTap for ConstantTap {
        fn on_read(&mut self, buffer: &mut StereoBuffer) {
            buffer.as_interleaved_mut().fill(self.0);
        }
    }

    #[test]
    fn test_tap_prepopulates_buffer() {
        let clip = pcm16_clip(2, &[0; 8]);
        let (_source, mut voice) = voice_for(&clip, 4);
        let tap: Box<dyn SampleTap> = Box::new(ConstantTap(0.2));
        assert!(voice.set_tap(Some(Owned::new(&gc_handle(), tap))).is_none());

        let mut buffer = StereoBuffer::silence(4);
        voice.fill_frames(&mut buffer);
        assert!(buffer.iter().all(|f| (f.left - 0.2).abs() < 1e-6));
    }
}
