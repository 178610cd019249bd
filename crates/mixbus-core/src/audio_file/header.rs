//! Canonical RIFF/WAVE header parsing
//!
//! Only the canonical 44-byte layout is understood: `fmt ` immediately after
//! `WAVE`, `data` immediately after `fmt `, sample data from byte 44.
//!
//! ```text
//!  0 "RIFF"        4 chunk size      8 "WAVE"
//! 12 "fmt "       16 fmt size       20 format tag   22 channels
//! 24 sample rate  28 byte rate      32 block align  34 bits/sample
//! 36 "data"       40 data size      44 samples...
//! ```

use super::AudioFileError;

/// Size of the canonical header
pub const HEADER_LEN: usize = 44;

/// Byte offset where sample data begins
pub const DATA_START: u64 = HEADER_LEN as u64;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_ALAW: u16 = 6;
const FORMAT_MULAW: u16 = 7;

/// Sample encoding resolved from format tag and bit depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Pcm8,
    Pcm16,
    Pcm32,
    IeeeFloat,
    ALaw,
    MuLaw,
    Unknown,
}

impl Encoding {
    /// Map a `(format tag, bits per sample)` pair to an encoding
    pub fn resolve(format_tag: u16, bits_per_sample: u16) -> Self {
        match (format_tag, bits_per_sample) {
            (FORMAT_PCM, 8) => Encoding::Pcm8,
            (FORMAT_PCM, 16) => Encoding::Pcm16,
            (FORMAT_PCM, 32) => Encoding::Pcm32,
            (FORMAT_IEEE_FLOAT, 32) => Encoding::IeeeFloat,
            (FORMAT_ALAW, 8) => Encoding::ALaw,
            (FORMAT_MULAW, 8) => Encoding::MuLaw,
            _ => Encoding::Unknown,
        }
    }

    pub fn is_supported(self) -> bool {
        self != Encoding::Unknown
    }
}

/// Parsed format of a WAVE clip
///
/// Produced once per successful open; never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub encoding: Encoding,
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub bytes_per_sample: u16,
    /// Bytes of sample data that can actually be read
    pub data_len: u64,
}

impl WaveFormat {
    /// Parse a canonical header
    ///
    /// `total_len` is the full length of the byte source. The usable data
    /// length is the smaller of the declared `data` size and what follows the
    /// header, rounded down to whole frames.
    pub fn parse(header: &[u8], total_len: u64) -> Result<Self, AudioFileError> {
        if header.len() < HEADER_LEN || total_len < DATA_START {
            return Err(AudioFileError::Truncated(total_len.min(header.len() as u64)));
        }
        if &header[0..4] != b"RIFF" {
            return Err(AudioFileError::InvalidFormat("Not a RIFF file"));
        }
        if &header[8..12] != b"WAVE" {
            return Err(AudioFileError::InvalidFormat("Not a WAVE file"));
        }

        let format_tag = read_u16(header, 20);
        let channels = read_u16(header, 22);
        let sample_rate = read_u32(header, 24);
        let byte_rate = read_u32(header, 28);
        let block_align = read_u16(header, 32);
        let bits_per_sample = read_u16(header, 34);
        let declared_len = read_u32(header, 40) as u64;

        let encoding = Encoding::resolve(format_tag, bits_per_sample);
        if !encoding.is_supported() {
            return Err(AudioFileError::UnsupportedEncoding {
                format_tag,
                bits_per_sample,
            });
        }
        if !(1..=2).contains(&channels) {
            return Err(AudioFileError::UnsupportedChannels(channels));
        }

        let bytes_per_sample = bits_per_sample / 8;
        let frame_bytes = bytes_per_sample as u64 * channels as u64;
        let available = declared_len.min(total_len - DATA_START);
        let data_len = available - available % frame_bytes;

        Ok(Self {
            encoding,
            format_tag,
            channels,
            sample_rate,
            byte_rate,
            block_align,
            bits_per_sample,
            bytes_per_sample,
            data_len,
        })
    }

    /// Bytes per interleaved frame
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.bytes_per_sample as usize * self.channels as usize
    }

    /// Whole frames in the data region
    pub fn total_frames(&self) -> u64 {
        self.data_len / self.frame_bytes() as u64
    }

    pub fn duration_secs(&self) -> f64 {
        self.total_frames() as f64 / self.sample_rate.max(1) as f64
    }
}

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
pub(crate) fn canonical_header(
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_len: u32,
) -> [u8; HEADER_LEN] {
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    // Streaming placeholders declare u32::MAX; the RIFF size wraps like a real writer's
    h[4..8].copy_from_slice(&36u32.wrapping_add(data_len).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&format_tag.to_le_bytes());
    h[22..24].copy_from_slice(&channels.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}
