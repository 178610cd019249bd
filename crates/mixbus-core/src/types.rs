//! Common sample and buffer types
//!
//! Everything the mixer produces is stereo `f32`. Sources decode into
//! [`StereoBuffer`]s, effects process them in place, and the engine hands
//! the final buffer to the device as an interleaved `[L, R, L, R, ...]` view.

use std::ops::{Index, IndexMut};

/// Audio sample type used for all processing
pub type Sample = f32;

/// A single stereo frame (left and right channels)
///
/// `#[repr(C)]` pins the layout to `[left, right]`, which lets
/// `&[StereoSample]` be viewed as interleaved `&[f32]` through bytemuck.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Duplicate a mono value into both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Hard-limit both channels to `[-1.0, 1.0]`
    #[inline]
    pub fn clamped(self) -> Self {
        Self {
            left: self.left.clamp(-1.0, 1.0),
            right: self.right.clamp(-1.0, 1.0),
        }
    }

    /// Peak amplitude across both channels
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A fixed-length buffer of stereo frames
///
/// Buffers on the render path are sized once at construction and never
/// resized afterwards; every method below except the constructors is
/// allocation-free.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Create a buffer of `frames` silent frames
    pub fn silence(frames: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); frames],
        }
    }

    /// Create a buffer from interleaved samples `[L, R, L, R, ...]`
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        assert!(interleaved.len() % 2 == 0, "Interleaved buffer must have even length");
        let samples = interleaved
            .chunks_exact(2)
            .map(|pair| StereoSample::new(pair[0], pair[1]))
            .collect();
        Self { samples }
    }

    /// Number of stereo frames
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Zero-copy interleaved view `[L, R, L, R, ...]`
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Zero-copy mutable interleaved view `[L, R, L, R, ...]`
    #[inline]
    pub fn as_interleaved_mut(&mut self) -> &mut [Sample] {
        bytemuck::cast_slice_mut(&mut self.samples)
    }

    /// Sum another buffer of the same length into this one
    pub fn add_buffer(&mut self, other: &StereoBuffer) {
        debug_assert_eq!(self.len(), other.len(), "Buffer lengths must match");
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
    }

    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Hard-clamp every sample to `[-1.0, 1.0]`
    pub fn clamp_unit(&mut self) {
        for sample in self.as_interleaved_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    /// Peak amplitude across the whole buffer
    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.peak()).fold(0.0, Sample::max)
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_view_is_lr_ordered() {
        let mut buffer = StereoBuffer::silence(2);
        buffer[0] = StereoSample::new(0.1, 0.2);
        buffer[1] = StereoSample::new(0.3, 0.4);

        assert_eq!(buffer.as_interleaved(), &[0.1, 0.2, 0.3, 0.4]);

        buffer.as_interleaved_mut()[3] = -0.4;
        assert_eq!(buffer[1].right, -0.4);
    }

    #[test]
    fn test_add_buffer_and_clamp() {
        let mut a = StereoBuffer::from_interleaved(&[0.7, -0.7, 0.2, 0.0]);
        let b = StereoBuffer::from_interleaved(&[0.7, -0.7, 0.2, 0.0]);

        a.add_buffer(&b);
        a.clamp_unit();

        assert_eq!(a[0], StereoSample::new(1.0, -1.0));
        assert!((a[1].left - 0.4).abs() < 0.001);
    }

    #[test]
    fn test_sample_ops() {
        let mut s = StereoSample::mono(0.5) * 4.0;
        assert_eq!(s, StereoSample::new(2.0, 2.0));
        s += StereoSample::new(-1.0, -5.0);
        assert_eq!(s.clamped(), StereoSample::new(1.0, -1.0));
        assert_eq!(s.peak(), 3.0);
    }
}
