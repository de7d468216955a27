//! Level measurement, gain, trimming and mixing

use crate::audio::PcmBuffer;

/// Level reported for digital silence
pub const SILENCE_DB: f64 = f64::NEG_INFINITY;

/// Default headroom left by [`peak_normalize`]
pub const NORMALIZE_HEADROOM_DB: f64 = 0.1;

pub fn db_to_amplitude(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        SILENCE_DB
    } else {
        20.0 * amplitude.log10()
    }
}

/// Absolute peak level in dBFS
pub fn peak_db(buf: &PcmBuffer) -> f64 {
    let peak = buf.samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    amplitude_to_db(peak as f64)
}

/// RMS level relative to full scale
pub fn dbfs(buf: &PcmBuffer) -> f64 {
    if buf.is_empty() {
        return SILENCE_DB;
    }
    let mean_square =
        buf.samples.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / buf.samples.len() as f64;
    amplitude_to_db(mean_square.sqrt())
}

pub fn apply_gain_db(buf: &mut PcmBuffer, db: f64) {
    if db == 0.0 || !db.is_finite() {
        return;
    }
    let gain = db_to_amplitude(db) as f32;
    for s in &mut buf.samples {
        *s *= gain;
    }
}

/// Scale so the absolute peak sits `headroom_db` below full scale.
/// Silent buffers are left untouched.
pub fn peak_normalize(buf: &mut PcmBuffer, headroom_db: f64) {
    let peak = peak_db(buf);
    if peak.is_finite() {
        apply_gain_db(buf, -headroom_db - peak);
    }
}

/// Loudness normalization towards `target_db` integrated level with a
/// `ceiling_db` peak limit.
///
/// Integrated loudness is approximated by the RMS level of the whole
/// buffer. The gain is reduced when it would push the peak over the
/// ceiling.
pub fn loudness_normalize(buf: &mut PcmBuffer, target_db: f64, ceiling_db: f64) {
    let level = dbfs(buf);
    let peak = peak_db(buf);
    if !level.is_finite() || !peak.is_finite() {
        return;
    }
    let gain = (target_db - level).min(ceiling_db - peak);
    apply_gain_db(buf, gain);
}

/// Drop everything before the first frame whose peak reaches `threshold_db`.
///
/// A buffer that never reaches the threshold comes back empty.
pub fn trim_leading_silence(buf: &PcmBuffer, threshold_db: f64) -> PcmBuffer {
    let threshold = db_to_amplitude(threshold_db) as f32;
    let ch = buf.channels as usize;
    let start = buf
        .samples
        .chunks_exact(ch)
        .position(|frame| frame.iter().any(|s| s.abs() >= threshold))
        .unwrap_or(buf.frames());

    let mut out = buf.clone();
    out.skip_frames(start);
    out
}

/// Weighted mix of `background` with `foreground` looped to cover it.
///
/// The output has the background's length, rate and channel count. Weights
/// are normalized by their sum.
pub fn loop_mix(
    background: &PcmBuffer,
    foreground: &PcmBuffer,
    background_weight: f32,
    foreground_weight: f32,
) -> PcmBuffer {
    let total = background_weight + foreground_weight;
    let (wb, wf) = if total > 0.0 {
        (background_weight / total, foreground_weight / total)
    } else {
        (0.5, 0.5)
    };

    let ch = background.channels as usize;
    let fg = match background.channels {
        1 => foreground.to_mono(),
        _ => foreground.to_stereo(),
    };
    let fg_frames = fg.frames();

    let mut out = background.clone();
    for (i, frame) in out.samples.chunks_exact_mut(ch).enumerate() {
        for (c, sample) in frame.iter_mut().enumerate() {
            let f = if fg_frames == 0 {
                0.0
            } else {
                fg.samples[(i % fg_frames) * fg.channels as usize + c.min(fg.channels as usize - 1)]
            };
            *sample = wb * *sample + wf * f;
        }
    }
    out
}

/// Hard-clip into `[-1.0, 1.0]`
pub fn clip(buf: &mut PcmBuffer) {
    for s in &mut buf.samples {
        *s = s.clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: Vec<f32>) -> PcmBuffer {
        PcmBuffer::new(1000, 1, samples)
    }

    #[test]
    fn test_db_conversions() {
        assert!((amplitude_to_db(1.0)).abs() < 1e-9);
        assert!((amplitude_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert!((db_to_amplitude(-20.0) - 0.1).abs() < 1e-9);
        assert_eq!(amplitude_to_db(0.0), SILENCE_DB);
    }

    #[test]
    fn test_dbfs_of_full_scale_square() {
        let buf = mono(vec![1.0, -1.0, 1.0, -1.0]);
        assert!(dbfs(&buf).abs() < 1e-9);
        assert_eq!(dbfs(&mono(vec![0.0; 4])), SILENCE_DB);
    }

    #[test]
    fn test_peak_normalize() {
        let mut buf = mono(vec![0.1, -0.25, 0.2]);
        peak_normalize(&mut buf, NORMALIZE_HEADROOM_DB);
        assert!((peak_db(&buf) + NORMALIZE_HEADROOM_DB).abs() < 1e-4);
    }

    #[test]
    fn test_peak_normalize_leaves_silence() {
        let mut buf = mono(vec![0.0; 8]);
        peak_normalize(&mut buf, NORMALIZE_HEADROOM_DB);
        assert!(buf.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_loudness_normalize_respects_ceiling() {
        // Sparse spike: RMS is low, so the target gain would clip the peak
        let mut samples = vec![0.0; 1000];
        samples[10] = 0.5;
        let mut buf = mono(samples);
        loudness_normalize(&mut buf, -16.0, -1.5);
        assert!((peak_db(&buf) + 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_loudness_normalize_hits_target() {
        let samples: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        let mut buf = mono(samples);
        loudness_normalize(&mut buf, -16.0, -1.5);
        assert!((dbfs(&buf) + 16.0).abs() < 1e-3);
    }

    #[test]
    fn test_trim_leading_silence() {
        let buf = PcmBuffer::new(1000, 2, vec![0.0, 0.0, 0.001, 0.0, 0.0, 0.5, 0.2, 0.2]);
        let trimmed = trim_leading_silence(&buf, -40.0);
        assert_eq!(trimmed.frames(), 2);
        assert_eq!(trimmed.samples[1], 0.5);
    }

    #[test]
    fn test_trim_all_silent_is_empty() {
        let trimmed = trim_leading_silence(&mono(vec![0.0; 16]), -40.0);
        assert!(trimmed.is_empty());
    }

    #[test]
    fn test_loop_mix_loops_foreground() {
        let bg = PcmBuffer::new(1000, 2, vec![1.0; 10]);
        let fg = mono(vec![1.0, 0.0]);
        let out = loop_mix(&bg, &fg, 0.5, 0.5);
        assert_eq!(out.frames(), 5);
        assert_eq!(out.samples, vec![1.0, 1.0, 0.5, 0.5, 1.0, 1.0, 0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_loop_mix_empty_foreground() {
        let bg = PcmBuffer::new(1000, 2, vec![0.8; 4]);
        let out = loop_mix(&bg, &mono(vec![]), 0.6, 0.4);
        assert!(out.samples.iter().all(|&s| (s - 0.48).abs() < 1e-6));
    }
}
