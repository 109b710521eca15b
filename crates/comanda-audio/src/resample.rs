//! Sample-rate and sample-format conversion.
//!
//! Linear interpolation is enough for short speech frames where
//! latency matters more than phase accuracy.

/// Resamples mono samples from `from_rate` to `to_rate` with linear
/// interpolation.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return input.to_vec();
    }

    let ratio = to_rate as f32 / from_rate as f32;
    let output_len = (input.len() as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input.len() {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }

    output
}

/// Truncates or pads a frame to exactly `desired` samples, repeating
/// the last sample when padding.
pub fn adjust_frame_length(mut data: Vec<f32>, desired: usize) -> Vec<f32> {
    use std::cmp::Ordering;
    match data.len().cmp(&desired) {
        Ordering::Greater => data.truncate(desired),
        Ordering::Less => {
            let pad = data.last().copied().unwrap_or(0.0);
            data.resize(desired, pad);
        }
        Ordering::Equal => {}
    }
    data
}

/// Converts float samples to little-endian 16-bit PCM bytes, clamping
/// to the valid range.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Converts little-endian 16-bit PCM bytes back to float samples.
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}
