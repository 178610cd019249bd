//! Chunked reader over a clip's data region
//!
//! A [`ChunkStream`] is opened on the control thread (file open and header
//! parse happen there) and then handed to the render thread, which only ever
//! calls [`ChunkStream::read_chunk`] and [`ChunkStream::seek_to_data_start`].
//! Neither allocates. A short read means end-of-data; the stream never wraps
//! on its own.

use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::header::{WaveFormat, DATA_START, HEADER_LEN};
use super::{AudioClip, AudioFileError, ClipSource};

/// Open byte source backing a stream
enum ByteSource {
    File(BufReader<File>),
    Memory(Cursor<Arc<[u8]>>),
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ByteSource::File(reader) => reader.read(buf),
            ByteSource::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            ByteSource::File(reader) => reader.seek(pos),
            ByteSource::Memory(cursor) => cursor.seek(pos),
        }
    }
}

/// Sequential reader over the sample data of one clip
pub struct ChunkStream {
    source: ByteSource,
    format: WaveFormat,
    /// Cursor relative to [`DATA_START`], always within `0..=format.data_len`
    position: u64,
}

impl ChunkStream {
    /// Open `clip`, validate its header and position at the first sample
    pub fn open(clip: &AudioClip) -> Result<Self, AudioFileError> {
        let (source, format) = match clip.source() {
            ClipSource::File(path) => {
                let io_err = |source| AudioFileError::Io {
                    path: path.clone(),
                    source,
                };
                let file = File::open(path).map_err(io_err)?;
                let total_len = file.metadata().map_err(io_err)?.len();

                let mut reader = BufReader::new(file);
                let mut header = [0u8; HEADER_LEN];
                match reader.read_exact(&mut header) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        return Err(AudioFileError::Truncated(total_len));
                    }
                    Err(e) => return Err(io_err(e)),
                }

                let format = WaveFormat::parse(&header, total_len)?;
                (ByteSource::File(reader), format)
            }
            ClipSource::Memory(bytes) => {
                let total_len = bytes.len() as u64;
                let head = &bytes[..bytes.len().min(HEADER_LEN)];
                let format = WaveFormat::parse(head, total_len)?;

                let mut cursor = Cursor::new(Arc::clone(bytes));
                cursor.set_position(DATA_START);
                (ByteSource::Memory(cursor), format)
            }
        };

        log::debug!(
            "Opened {} ({:?}, {} ch, {} Hz, {} data bytes)",
            clip.name(),
            format.encoding,
            format.channels,
            format.sample_rate,
            format.data_len
        );

        Ok(Self {
            source,
            format,
            position: 0,
        })
    }

    /// Format parsed from the header
    #[inline]
    pub fn format(&self) -> &WaveFormat {
        &self.format
    }

    /// Bytes consumed since the start of the data region
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left before end-of-data
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.format.data_len - self.position
    }

    /// Read up to `dst.len()` bytes
    ///
    /// Returns fewer bytes (possibly zero) only at end-of-data. Partial OS
    /// reads are retried; an I/O error is treated as end-of-data.
    pub fn read_chunk(&mut self, dst: &mut [u8]) -> usize {
        let wanted = (dst.len() as u64).min(self.remaining()) as usize;
        let mut filled = 0;

        while filled < wanted {
            match self.source.read(&mut dst[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        self.position += filled as u64;
        filled
    }

    /// Rewind to the first byte after the header
    ///
    /// If the seek fails the stream reports itself exhausted rather than
    /// serving bytes from an unknown offset.
    pub fn seek_to_data_start(&mut self) {
        self.position = match self.source.seek(SeekFrom::Start(DATA_START)) {
            Ok(_) => 0,
            Err(_) => self.format.data_len,
        };
    }

    /// Chunk bookkeeping for reads of `chunk_size` bytes
    pub fn layout(&self, chunk_size: usize) -> ChunkLayout {
        ChunkLayout::new(self.format.data_len, chunk_size)
    }
}

/// How a data region splits into fixed-size chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: usize,
    pub total_chunks: u64,
    pub last_chunk_size: usize,
}

impl ChunkLayout {
    pub fn new(data_len: u64, chunk_size: usize) -> Self {
        if chunk_size == 0 || data_len == 0 {
            return Self {
                chunk_size,
                total_chunks: 0,
                last_chunk_size: 0,
            };
        }

        let size = chunk_size as u64;
        let total_chunks = data_len.div_ceil(size);
        let last_chunk_size = match data_len % size {
            0 => chunk_size,
            rem => rem as usize,
        };

        Self {
            chunk_size,
            total_chunks,
            last_chunk_size,
        }
    }

    /// Size of chunk `index`, zero past the end
    pub fn chunk_len(&self, index: u64) -> usize {
        if index >= self.total_chunks {
            0
        } else if index + 1 == self.total_chunks {
            self.last_chunk_size
        } else {
            self.chunk_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::canonical_header;

    fn memory_clip(data: &[u8]) -> AudioClip {
        let mut bytes = canonical_header(1, 1, 8000, 8, data.len() as u32).to_vec();
        bytes.extend_from_slice(data);
        AudioClip::from_bytes("mem", bytes)
    }

    #[test]
    fn test_read_chunk_short_read_at_end() {
        let mut stream = ChunkStream::open(&memory_clip(&[1, 2, 3, 4, 5])).unwrap();
        let mut buf = [0u8; 4];

        assert_eq!(stream.read_chunk(&mut buf), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(stream.read_chunk(&mut buf), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(stream.read_chunk(&mut buf), 0);
        assert_eq!(stream.remaining(), 0);
    }

    #[test]
    fn test_seek_to_data_start_rewinds() {
        let mut stream = ChunkStream::open(&memory_clip(&[9, 8, 7])).unwrap();
        let mut buf = [0u8; 8];

        assert_eq!(stream.read_chunk(&mut buf), 3);
        stream.seek_to_data_start();
        assert_eq!(stream.position(), 0);
        assert_eq!(stream.read_chunk(&mut buf[..2]), 2);
        assert_eq!(&buf[..2], &[9, 8]);
    }

    #[test]
    fn test_reads_stop_at_declared_data_len() {
        // Trailing bytes after the data chunk must not be served
        let mut bytes = canonical_header(1, 1, 8000, 8, 2).to_vec();
        bytes.extend_from_slice(&[1, 2, b'L', b'I', b'S', b'T']);
        let mut stream = ChunkStream::open(&AudioClip::from_bytes("tail", bytes)).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(stream.read_chunk(&mut buf), 2);
    }

    #[test]
    fn test_open_memory_truncated() {
        let clip = AudioClip::from_bytes("short", vec![b'R', b'I', b'F', b'F']);
        assert!(matches!(ChunkStream::open(&clip), Err(AudioFileError::Truncated(4))));
    }

    #[test]
    fn test_open_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..10i16 {
            writer.write_sample(i * 100).unwrap();
            writer.write_sample(-i * 100).unwrap();
        }
        writer.finalize().unwrap();

        let mut stream = ChunkStream::open(&AudioClip::stream(&path)).unwrap();
        assert_eq!(stream.format().channels, 2);
        assert_eq!(stream.format().data_len, 40);

        let mut buf = [0u8; 8];
        assert_eq!(stream.read_chunk(&mut buf), 8);
        assert_eq!(i16::from_le_bytes([buf[4], buf[5]]), 100);
        assert_eq!(i16::from_le_bytes([buf[6], buf[7]]), -100);
    }

    #[test]
    fn test_open_missing_file() {
        let clip = AudioClip::stream("/nonexistent/missing.wav");
        assert!(matches!(ChunkStream::open(&clip), Err(AudioFileError::Io { .. })));
    }

    #[test]
    fn test_chunk_layout() {
        let layout = ChunkLayout::new(4096 + 100, 1024);
        assert_eq!(layout.total_chunks, 5);
        assert_eq!(layout.last_chunk_size, 100);
        assert_eq!(layout.chunk_len(0), 1024);
        assert_eq!(layout.chunk_len(4), 100);
        assert_eq!(layout.chunk_len(5), 0);

        let exact = ChunkLayout::new(2048, 1024);
        assert_eq!(exact.total_chunks, 2);
        assert_eq!(exact.chunk_len(1), 1024);

        assert_eq!(ChunkLayout::new(0, 1024).total_chunks, 0);
    }
}
