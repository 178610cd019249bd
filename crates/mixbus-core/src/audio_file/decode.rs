//! Raw sample decoders
//!
//! Every decoder takes `(bytes, offset, bits_per_sample)` and returns one
//! normalized sample, approximately in `[-1.0, 1.0]`. For the byte-wide
//! encodings `offset` is a byte offset; for the G.711 companded encodings it
//! indexes packed samples, which at 8 bits per sample is the same thing.

use super::Encoding;

const PCM16_SCALE: f32 = 1.0 / 32767.0;
const PCM32_SCALE: f64 = 1.0 / 2147483647.0;
const G711_SCALE: f32 = 1.0 / 32768.0;

/// Decode one sample with the decoder for `encoding`
///
/// `Unknown` has no decoder; parsing rejects it, so it decodes to silence.
#[inline]
pub fn decode_sample(encoding: Encoding, bytes: &[u8], offset: usize, bits_per_sample: u16) -> f32 {
    match encoding {
        Encoding::Pcm8 => decode_pcm8(bytes, offset, bits_per_sample),
        Encoding::Pcm16 => decode_pcm16(bytes, offset, bits_per_sample),
        Encoding::Pcm32 => decode_pcm32(bytes, offset, bits_per_sample),
        Encoding::IeeeFloat => decode_ieee_float(bytes, offset, bits_per_sample),
        Encoding::ALaw => decode_alaw(bytes, offset, bits_per_sample),
        Encoding::MuLaw => decode_mulaw(bytes, offset, bits_per_sample),
        Encoding::Unknown => 0.0,
    }
}

/// Unsigned 8-bit PCM
#[inline]
pub fn decode_pcm8(bytes: &[u8], offset: usize, _bits_per_sample: u16) -> f32 {
    (bytes[offset] as f32 / 255.0) * 2.0 - 1.0
}

/// Signed little-endian 16-bit PCM
#[inline]
pub fn decode_pcm16(bytes: &[u8], offset: usize, _bits_per_sample: u16) -> f32 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f32 * PCM16_SCALE
}

/// Signed little-endian 32-bit PCM
#[inline]
pub fn decode_pcm32(bytes: &[u8], offset: usize, _bits_per_sample: u16) -> f32 {
    let value = i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]);
    // f64 keeps full precision before narrowing
    (value as f64 * PCM32_SCALE) as f32
}

/// Little-endian IEEE-754 single precision, passed through unchanged
#[inline]
pub fn decode_ieee_float(bytes: &[u8], offset: usize, _bits_per_sample: u16) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// G.711 A-law
#[inline]
pub fn decode_alaw(bytes: &[u8], offset: usize, bits_per_sample: u16) -> f32 {
    alaw_to_linear(packed_code(bytes, offset, bits_per_sample)) as f32 * G711_SCALE
}

/// G.711 μ-law
#[inline]
pub fn decode_mulaw(bytes: &[u8], offset: usize, bits_per_sample: u16) -> f32 {
    mulaw_to_linear(packed_code(bytes, offset, bits_per_sample)) as f32 * G711_SCALE
}

/// Extract the `offset`-th packed code of `bits` width
#[inline]
fn packed_code(bytes: &[u8], offset: usize, bits: u16) -> u8 {
    let bits = bits.clamp(1, 8) as usize;
    let per_byte = 8 / bits;
    let byte = bytes[offset / per_byte];
    let shift = bits * (offset % per_byte);
    let mask = if bits == 8 { 0xFF } else { (1u8 << bits) - 1 };
    (byte >> shift) & mask
}

/// Expand an A-law code to 16-bit linear PCM
fn alaw_to_linear(code: u8) -> i16 {
    let a = code ^ 0x55;
    let mut magnitude = ((a & 0x0F) as i32) << 4;
    let segment = ((a & 0x70) >> 4) as i32;
    match segment {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => {
            magnitude += 0x108;
            magnitude <<= segment - 1;
        }
    }
    if a & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// Expand a μ-law code to 16-bit linear PCM
fn mulaw_to_linear(code: u8) -> i16 {
    const BIAS: i32 = 0x84;
    let u = !code;
    let mut magnitude = (((u & 0x0F) as i32) << 3) + BIAS;
    magnitude <<= ((u & 0x70) >> 4) as i32;
    if u & 0x80 != 0 {
        (BIAS - magnitude) as i16
    } else {
        (magnitude - BIAS) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm8_range() {
        assert_eq!(decode_pcm8(&[255], 0, 8), 1.0);
        assert_eq!(decode_pcm8(&[0], 0, 8), -1.0);
        assert!(decode_pcm8(&[128], 0, 8).abs() < 0.01);
    }

    #[test]
    fn test_pcm16_extremes() {
        let max = 32767i16.to_le_bytes();
        let min = (-32768i16).to_le_bytes();
        assert!((decode_pcm16(&max, 0, 16) - 0.99997).abs() < 1e-4);
        assert!((decode_pcm16(&[0, 0, max[0], max[1]], 2, 16) - 1.0).abs() < 1e-6);
        assert!((decode_pcm16(&min, 0, 16) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_pcm32_extremes() {
        let max = i32::MAX.to_le_bytes();
        let half = (i32::MAX / 2).to_le_bytes();
        assert!((decode_pcm32(&max, 0, 32) - 1.0).abs() < 1e-6);
        assert!((decode_pcm32(&half, 0, 32) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ieee_float_exact() {
        let bytes = [0.25f32.to_le_bytes(), 0.5f32.to_le_bytes()].concat();
        assert_eq!(decode_ieee_float(&bytes, 4, 32), 0.5);
        assert_eq!(decode_ieee_float(&bytes, 0, 32), 0.25);
    }

    #[test]
    fn test_alaw_reference_codes() {
        // 0xD5 / 0x55 are the smallest positive / negative steps
        assert_eq!(alaw_to_linear(0xD5), 8);
        assert_eq!(alaw_to_linear(0x55), -8);
        assert_eq!(alaw_to_linear(0xAA), 32256);
        assert_eq!(alaw_to_linear(0x2A), -32256);

        assert!((decode_alaw(&[0xD5], 0, 8) - 8.0 / 32768.0).abs() < 1e-7);
        assert!((decode_alaw(&[0xAA], 0, 8) - 0.984375).abs() < 1e-6);
    }

    #[test]
    fn test_mulaw_reference_codes() {
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(mulaw_to_linear(0x7F), 0);
        assert_eq!(mulaw_to_linear(0x80), 32124);
        assert_eq!(mulaw_to_linear(0x00), -32124);

        assert_eq!(decode_mulaw(&[0xFF], 0, 8), 0.0);
        assert!((decode_mulaw(&[0x80], 0, 8) - 32124.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_companded_values_are_symmetric() {
        for code in 0u8..=0x7F {
            assert_eq!(mulaw_to_linear(code), -mulaw_to_linear(code | 0x80));
            assert_eq!(alaw_to_linear(code), -alaw_to_linear(code | 0x80));
        }
    }

    #[test]
    fn test_packed_code_extraction() {
        // Two 4-bit codes per byte, low nibble first
        assert_eq!(packed_code(&[0xA5], 0, 4), 0x5);
        assert_eq!(packed_code(&[0xA5], 1, 4), 0xA);
        assert_eq!(packed_code(&[0x12, 0x34], 1, 8), 0x34);
    }

    #[test]
    fn test_dispatch_matches_direct_decoder() {
        let bytes = 16384i16.to_le_bytes();
        assert_eq!(
            decode_sample(Encoding::Pcm16, &bytes, 0, 16),
            decode_pcm16(&bytes, 0, 16)
        );
        assert_eq!(decode_sample(Encoding::MuLaw, &[0x80], 0, 8), decode_mulaw(&[0x80], 0, 8));
        assert_eq!(decode_sample(Encoding::Unknown, &bytes, 0, 16), 0.0);
    }
}
