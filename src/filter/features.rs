//! Voice fingerprint extraction.
//!
//! Produces a 128-element signature from raw PCM: four 32-element sub-bands
//! (per-frame energy, zero-crossing rate, spectral-centroid approximation,
//! and derived statistics), L2-normalized. Deliberately lightweight — the
//! extractor is a pluggable seam, not an MFCC pipeline.

/// Signature dimensionality.
pub const SIGNATURE_DIM: usize = 128;

/// Frames the input is split into; one value per frame per sub-band.
const BANDS: usize = 32;

/// Decode 16-bit little-endian mono PCM into normalized samples in [-1, 1].
///
/// A trailing odd byte is ignored.
pub fn decode_pcm(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Extract a unit-norm 128-element signature from normalized samples.
///
/// Layout: `[0..32)` per-frame RMS energy, `[32..64)` per-frame
/// zero-crossing rate, `[64..96)` per-frame spectral centroid, `[96..128)`
/// derived statistics (sample mean/stddev/min/max, then fixed pairwise
/// products of the earlier sub-bands). Empty or silent input yields the
/// zero vector.
pub fn extract_signature(samples: &[f32]) -> Vec<f32> {
    let mut signature = vec![0.0f32; SIGNATURE_DIM];
    if samples.is_empty() {
        return signature;
    }

    let frame_len = (samples.len() / BANDS).max(1);
    for band in 0..BANDS {
        let start = band * frame_len;
        if start >= samples.len() {
            break;
        }
        let end = (start + frame_len).min(samples.len());
        let frame = &samples[start..end];

        signature[band] = rms(frame);
        signature[BANDS + band] = zero_crossing_rate(frame);
        signature[2 * BANDS + band] = spectral_centroid(frame);
    }

    let stats = 3 * BANDS;
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    let variance =
        samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / samples.len() as f32;
    signature[stats] = mean;
    signature[stats + 1] = variance.sqrt();
    signature[stats + 2] = samples.iter().copied().fold(f32::INFINITY, f32::min);
    signature[stats + 3] = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    // Remaining slots: products of earlier sub-band features, alternating
    // energy*zcr and energy*centroid over the first frames.
    for k in 0..(BANDS - 4) {
        let frame = k / 2;
        let product = if k % 2 == 0 {
            signature[frame] * signature[BANDS + frame]
        } else {
            signature[frame] * signature[2 * BANDS + frame]
        };
        signature[stats + 4 + k] = product;
    }

    l2_normalize(&mut signature);
    signature
}

/// Average multiple signatures into one training signature and renormalize.
///
/// Returns the zero vector when given no signatures.
pub fn average_signatures(signatures: &[Vec<f32>]) -> Vec<f32> {
    let mut combined = vec![0.0f32; SIGNATURE_DIM];
    if signatures.is_empty() {
        return combined;
    }
    for signature in signatures {
        for (slot, value) in combined.iter_mut().zip(signature.iter()) {
            *slot += value;
        }
    }
    let count = signatures.len() as f32;
    for slot in combined.iter_mut() {
        *slot /= count;
    }
    l2_normalize(&mut combined);
    combined
}

/// Cosine similarity remapped from [-1, 1] to [0, 1].
///
/// A zero-norm operand (silence) yields 0.0 — silence matches nothing.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
    (sum_squares / frame.len() as f32).sqrt()
}

fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

/// Magnitude-weighted mean index within the frame, normalized to [0, 1].
fn spectral_centroid(frame: &[f32]) -> f32 {
    let total: f32 = frame.iter().map(|s| s.abs()).sum();
    if total == 0.0 || frame.len() < 2 {
        return 0.0;
    }
    let weighted: f32 = frame
        .iter()
        .enumerate()
        .map(|(i, s)| i as f32 * s.abs())
        .sum();
    weighted / total / (frame.len() - 1) as f32
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
