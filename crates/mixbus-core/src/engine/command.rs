//! Lock-free queues between the control thread and the render thread
//!
//! The control thread never touches render-side state directly. It pushes
//! [`MixerCommand`]s into an `rtrb` ring; the render thread drains the ring at
//! the start of every pass, before any source is mixed. A pass therefore sees
//! either all of a change (a new source, a swapped stream, an added effect)
//! or none of it.
//!
//! Render-side discoveries travel back the same way as [`SourceEvent`]s and
//! are dispatched to listeners by [`Mixer::poll_events`](super::Mixer::poll_events).
//!
//! Payloads that the render thread may end up dropping are wrapped in
//! `basedrop::Owned` so their destructors run on the collector thread.

use basedrop::Owned;

use super::source::{PlaybackSource, SampleTap, SourceId};
use crate::audio_file::ChunkStream;
use crate::effect::{EffectId, OwnedEffect, SharedControls};

/// Commands sent from the control thread to the render thread
pub enum MixerCommand {
    // ─────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────
    /// Add a voice to the render set
    Register { voice: Owned<PlaybackSource> },
    /// Remove a voice; it is dropped on the collector thread
    Unregister { source: SourceId },

    // ─────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────
    /// Start a freshly opened stream, replacing the voice's current one
    Play {
        source: SourceId,
        generation: u64,
        stream: Owned<ChunkStream>,
    },
    /// Replay the voice's current stream from the start of data
    Restart { source: SourceId, generation: u64 },
    /// Stop and rewind
    Stop { source: SourceId },

    // ─────────────────────────────────────────────────────────────
    // Effects
    // ─────────────────────────────────────────────────────────────
    /// Append an effect; parameter and bypass changes travel through
    /// `controls` rather than the queue
    AddEffect {
        source: SourceId,
        effect_id: EffectId,
        effect: OwnedEffect,
        controls: SharedControls,
    },
    RemoveEffect { source: SourceId, effect_id: EffectId },

    // ─────────────────────────────────────────────────────────────
    // Taps
    // ─────────────────────────────────────────────────────────────
    AttachTap {
        source: SourceId,
        tap: Owned<Box<dyn SampleTap>>,
    },
    DetachTap { source: SourceId },
}

impl MixerCommand {
    /// Source the command targets, if any
    pub fn source(&self) -> Option<SourceId> {
        match self {
            MixerCommand::Register { .. } => None,
            MixerCommand::Unregister { source }
            | MixerCommand::Play { source, .. }
            | MixerCommand::Restart { source, .. }
            | MixerCommand::Stop { source }
            | MixerCommand::AddEffect { source, .. }
            | MixerCommand::RemoveEffect { source, .. }
            | MixerCommand::AttachTap { source, .. }
            | MixerCommand::DetachTap { source } => Some(*source),
        }
    }

    /// Source the command concerns, including the voice a `Register` carries
    pub fn target(&self) -> SourceId {
        match self {
            MixerCommand::Register { voice } => voice.id(),
            MixerCommand::Unregister { source }
            | MixerCommand::Play { source, .. }
            | MixerCommand::Restart { source, .. }
            | MixerCommand::Stop { source }
            | MixerCommand::AddEffect { source, .. }
            | MixerCommand::RemoveEffect { source, .. }
            | MixerCommand::AttachTap { source, .. }
            | MixerCommand::DetachTap { source } => *source,
        }
    }
}

/// Notifications sent from the render thread to the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// A non-looping source ran out of data
    PlaybackEnded { source: SourceId },
}

/// Capacity of the command queue
///
/// Commands that do not fit wait in the mixer's backlog until the render
/// thread catches up.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the event queue
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Create the control → render command channel
pub fn command_channel() -> (rtrb::Producer<MixerCommand>, rtrb::Consumer<MixerCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Create the render → control event channel
pub fn event_channel() -> (rtrb::Producer<SourceEvent>, rtrb::Consumer<SourceEvent>) {
    rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AudioSource;

    #[test]
    fn test_command_channel_fifo() {
        let (mut tx, mut rx) = command_channel();
        let source = AudioSource::new().id();

        assert!(tx.push(MixerCommand::Restart { source, generation: 3 }).is_ok());
        assert!(tx.push(MixerCommand::Stop { source }).is_ok());

        let first = rx.pop().unwrap();
        assert!(matches!(first, MixerCommand::Restart { generation: 3, .. }));
        assert_eq!(first.source(), Some(source));
        assert!(matches!(rx.pop().unwrap(), MixerCommand::Stop { .. }));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size() {
        // Large payloads are behind Owned pointers; keep the ring compact
        let size = std::mem::size_of::<MixerCommand>();
        assert!(size <= 40, "MixerCommand is {} bytes, expected <= 40", size);
    }

    #[test]
    fn test_event_channel_capacity() {
        let (mut tx, _rx) = event_channel();
        let source = AudioSource::new().id();
        for _ in 0..EVENT_QUEUE_CAPACITY {
            assert!(tx.push(SourceEvent::PlaybackEnded { source }).is_ok());
        }
        assert!(tx.push(SourceEvent::PlaybackEnded { source }).is_err());
    }
}
