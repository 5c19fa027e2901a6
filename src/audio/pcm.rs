//! Sample-level operations on raw interleaved little-endian PCM.

use crate::models::SampleFormat;

/// Fixed-point scale for integer volume and mix coefficients
const FIXED_ONE: i64 = 1000;

fn range(format: SampleFormat) -> (i64, i64) {
    match format {
        SampleFormat::S8 => (i8::MIN as i64, i8::MAX as i64),
        SampleFormat::S16 => (i16::MIN as i64, i16::MAX as i64),
        SampleFormat::S24 => (-(1 << 23), (1 << 23) - 1),
        SampleFormat::S32 | SampleFormat::F32 => (i32::MIN as i64, i32::MAX as i64),
    }
}

fn read_int(format: SampleFormat, bytes: &[u8]) -> i64 {
    match format {
        SampleFormat::S8 => bytes[0] as i8 as i64,
        SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        SampleFormat::S24 => {
            let raw = (bytes[0] as i32) | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
            ((raw << 8) >> 8) as i64
        }
        SampleFormat::S32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        SampleFormat::F32 => unreachable!("float samples are not read as integers"),
    }
}

fn write_int(format: SampleFormat, bytes: &mut [u8], value: i64) {
    let (min, max) = range(format);
    let value = value.clamp(min, max);
    match format {
        SampleFormat::S8 => bytes[0] = value as i8 as u8,
        SampleFormat::S16 => bytes[..2].copy_from_slice(&(value as i16).to_le_bytes()),
        SampleFormat::S24 => bytes[..3].copy_from_slice(&(value as i32).to_le_bytes()[..3]),
        SampleFormat::S32 => bytes[..4].copy_from_slice(&(value as i32).to_le_bytes()),
        SampleFormat::F32 => unreachable!("float samples are not written as integers"),
    }
}

fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn write_f32(bytes: &mut [u8], value: f32) {
    bytes[..4].copy_from_slice(&value.to_le_bytes());
}

/// Convert a coefficient in `[0, 1]` to fixed point, rounding to nearest
fn to_fixed(coefficient: f32) -> i64 {
    (coefficient.max(0.0) as f64 * FIXED_ONE as f64).round() as i64
}

/// `(value * scale + FIXED_ONE/2) / FIXED_ONE`, rounding half up
fn scale_fixed(value: i64, scale: i64) -> i64 {
    (value * scale + FIXED_ONE / 2).div_euclid(FIXED_ONE)
}

/// Multiply every sample by `factor`, saturating at the format's limits
pub fn apply_volume(format: SampleFormat, pcm: &mut [u8], factor: f32) {
    if (factor - 1.0).abs() < f32::EPSILON {
        return;
    }
    let width = format.bytes();
    match format {
        SampleFormat::F32 => {
            for sample in pcm.chunks_exact_mut(width) {
                let value = read_f32(sample) * factor;
                write_f32(sample, value.clamp(-1.0, 1.0));
            }
        }
        _ => {
            let scale = to_fixed(factor);
            for sample in pcm.chunks_exact_mut(width) {
                let value = read_int(format, sample);
                write_int(format, sample, scale_fixed(value, scale));
            }
        }
    }
}

/// Mix `incoming` into `outgoing` in place:
/// `outgoing = outgoing * old_volume + incoming * (1 - old_volume)`.
///
/// Only the common prefix of both buffers is mixed. The weights sum to one
/// so the result never exceeds the sample range.
pub fn mix(format: SampleFormat, outgoing: &mut [u8], incoming: &[u8], old_volume: f32) {
    let width = format.bytes();
    match format {
        SampleFormat::F32 => {
            let old = old_volume.clamp(0.0, 1.0);
            let new = 1.0 - old;
            for (a, b) in outgoing.chunks_exact_mut(width).zip(incoming.chunks_exact(width)) {
                let value = read_f32(a) * old + read_f32(b) * new;
                write_f32(a, value);
            }
        }
        _ => {
            let old = to_fixed(old_volume.clamp(0.0, 1.0));
            let new = FIXED_ONE - old;
            for (a, b) in outgoing.chunks_exact_mut(width).zip(incoming.chunks_exact(width)) {
                let mixed = read_int(format, a) * old + read_int(format, b) * new;
                write_int(format, a, (mixed + FIXED_ONE / 2).div_euclid(FIXED_ONE));
            }
        }
    }
}

/// Decode interleaved PCM into normalized `f32` samples
pub fn to_f32(format: SampleFormat, pcm: &[u8]) -> Vec<f32> {
    let width = format.bytes();
    match format {
        SampleFormat::F32 => pcm.chunks_exact(width).map(read_f32).collect(),
        _ => {
            let scale = -(range(format).0 as f32);
            pcm.chunks_exact(width)
                .map(|sample| read_int(format, sample) as f32 / scale)
                .collect()
        }
    }
}

/// Encode a normalized `f32` sample into `format`
pub fn write_sample(format: SampleFormat, dest: &mut [u8], value: f32) {
    match format {
        SampleFormat::F32 => write_f32(dest, value),
        _ => {
            let (min, max) = range(format);
            let scaled = (value.clamp(-1.0, 1.0) as f64 * -(min as f64)).round() as i64;
            write_int(format, dest, scaled.clamp(min, max));
        }
    }
}
