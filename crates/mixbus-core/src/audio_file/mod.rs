//! WAVE clip handling
//!
//! A clip is either a path that is streamed from disk chunk by chunk, or a
//! fully materialized byte buffer. Both are opened through [`ChunkStream`],
//! which validates the canonical 44-byte RIFF/WAVE header and serves raw
//! sample bytes from the data region. [`decode`] turns those bytes into
//! normalized floats.

pub mod decode;
mod header;
mod stream;

pub use decode::decode_sample;
pub use header::{Encoding, WaveFormat, DATA_START, HEADER_LEN};
pub use stream::{ChunkLayout, ChunkStream};

#[cfg(test)]
pub(crate) use header::canonical_header;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while opening or parsing a clip
///
/// None of these ever reach the render thread: clips are opened on the
/// control side and a failure leaves the source idle.
#[derive(Error, Debug)]
pub enum AudioFileError {
    /// File missing or unreadable
    #[error("Failed to open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes than a canonical header
    #[error("Truncated header: {0} bytes, need at least 44")]
    Truncated(u64),

    /// `RIFF` / `WAVE` magic missing
    #[error("Invalid format: {0}")]
    InvalidFormat(&'static str),

    /// Format tag / bit depth combination with no decoder
    #[error("Unsupported encoding: format tag {format_tag}, {bits_per_sample} bits")]
    UnsupportedEncoding { format_tag: u16, bits_per_sample: u16 },

    /// Only mono and stereo clips can be mixed
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),
}

/// Where a clip's bytes come from
#[derive(Debug, Clone)]
pub enum ClipSource {
    /// Streamed from disk on demand
    File(PathBuf),
    /// Already in memory, shared between every stream opened on it
    Memory(Arc<[u8]>),
}

/// A named WAVE byte source
#[derive(Debug, Clone)]
pub struct AudioClip {
    name: String,
    source: ClipSource,
}

impl AudioClip {
    /// Clip that streams `path` from disk
    pub fn stream(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            source: ClipSource::File(path),
        }
    }

    /// Read `path` fully into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AudioFileError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| AudioFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded {:?} into memory ({} bytes)", path, bytes.len());
        Ok(Self::from_bytes(path.display().to_string(), bytes))
    }

    /// Clip over bytes that are already in memory
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            source: ClipSource::Memory(bytes.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ClipSource {
        &self.source
    }

    /// Whether both clips refer to the same bytes
    ///
    /// Streamed clips compare by path, in-memory clips by buffer identity.
    pub fn same_source(&self, other: &AudioClip) -> bool {
        match (&self.source, &other.source) {
            (ClipSource::File(a), ClipSource::File(b)) => a == b,
            (ClipSource::Memory(a), ClipSource::Memory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
