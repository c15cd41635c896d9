//! Conversions between normalized float samples and signed 16-bit PCM.

/// Scale factor used when going from float to i16.
const I16_SCALE_OUT: f32 = 32767.0;
/// Scale factor used when going from i16 to float.
const I16_SCALE_IN: f32 = 32768.0;

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * I16_SCALE_OUT) as i16
}

pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| to_i16(s)).collect()
}

pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / I16_SCALE_IN).collect()
}

/// Encode float samples as little-endian s16 bytes, the recognizer wire format.
pub fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&to_i16(s).to_le_bytes());
    }
    out
}

/// Decode little-endian s16 bytes. A trailing odd byte is ignored.
pub fn s16le_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / I16_SCALE_IN)
        .collect()
}
