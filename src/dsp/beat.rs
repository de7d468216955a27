//! Tempo and beat analysis
//!
//! Spectral-flux onset envelope, autocorrelation tempo estimate and a beat
//! list snapped to detected onsets. Used to find how long four heartbeats
//! last and how fast the background track is.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::audio::PcmBuffer;

/// Tempo assumed when analysis finds nothing usable
pub const DEFAULT_TEMPO: f64 = 120.0;

const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;

/// Result of analyzing one clip
#[derive(Debug, Clone)]
pub struct BeatAnalysis {
    /// Estimated tempo in beats per minute
    pub bpm: f64,
    /// Beat times in seconds from the start of the clip
    pub beats: Vec<f64>,
    /// Autocorrelation strength of the chosen period (0.0 - 1.0)
    pub confidence: f32,
}

impl BeatAnalysis {
    /// Time spanned by `count` beats, when at least `count + 1` beats were found.
    pub fn duration_of_beats(&self, count: usize) -> Option<f64> {
        if self.beats.len() > count {
            Some(self.beats[count] - self.beats[0])
        } else {
            None
        }
    }
}

/// 5-tap triangular smoothing so periods that fall between two frame
/// lags still correlate
fn smooth(onset_fn: &[f32]) -> Vec<f32> {
    const KERNEL: [f32; 5] = [1.0 / 9.0, 2.0 / 9.0, 3.0 / 9.0, 2.0 / 9.0, 1.0 / 9.0];
    let n = onset_fn.len() as isize;
    (0..n)
        .map(|i| {
            KERNEL
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = i + k as isize - 2;
                    if j < 0 || j >= n {
                        0.0
                    } else {
                        w * onset_fn[j as usize]
                    }
                })
                .sum()
        })
        .collect()
}

pub struct BeatAnalyzer {
    sample_rate: u32,
    hop_size: usize,
    fft_size: usize,
    fft: Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
}

impl BeatAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        let fft_size = 2048;
        let hop_size = 512;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Self {
            sample_rate,
            hop_size,
            fft_size,
            fft,
            window,
        }
    }

    fn frames_per_second(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }

    /// Analyze at most the first `max_secs` seconds of `buf`.
    ///
    /// Returns `None` when the clip is too short or has no periodic onsets.
    pub fn analyze(&self, buf: &PcmBuffer, max_secs: f64) -> Option<BeatAnalysis> {
        let mut mono = buf.to_mono();
        mono.truncate_secs(max_secs);

        let onset_fn = self.onset_function(&mono.samples);
        let (bpm, confidence) = self.estimate_bpm(&onset_fn)?;
        let peaks = self.onset_peaks(&onset_fn);
        let beats = self.beat_times(&peaks, onset_fn.len(), bpm);

        tracing::debug!(
            bpm = bpm,
            confidence = confidence,
            beats = beats.len(),
            "Beat analysis complete"
        );

        Some(BeatAnalysis {
            bpm: bpm as f64,
            beats,
            confidence,
        })
    }

    /// Tempo of `buf`, or [`DEFAULT_TEMPO`] when analysis fails.
    pub fn tempo_or_default(&self, buf: &PcmBuffer, max_secs: f64) -> f64 {
        self.analyze(buf, max_secs)
            .map(|a| a.bpm)
            .filter(|bpm| *bpm > 0.0)
            .unwrap_or(DEFAULT_TEMPO)
    }

    /// Half-wave rectified spectral flux, normalized to a peak of 1.0
    fn onset_function(&self, mono: &[f32]) -> Vec<f32> {
        let mut onset_fn = Vec::new();
        let mut prev_spectrum: Option<Vec<f32>> = None;

        let mut frame_start = 0;
        while frame_start + self.fft_size <= mono.len() {
            let frame = &mono[frame_start..frame_start + self.fft_size];
            let mut buffer: Vec<Complex<f32>> = frame
                .iter()
                .zip(&self.window)
                .map(|(s, w)| Complex::new(s * w, 0.0))
                .collect();
            self.fft.process(&mut buffer);

            let spectrum: Vec<f32> = buffer[..self.fft_size / 2]
                .iter()
                .map(|c| c.norm())
                .collect();

            let flux = match prev_spectrum {
                Some(ref prev) => spectrum
                    .iter()
                    .zip(prev.iter())
                    .map(|(curr, prev)| (curr - prev).max(0.0))
                    .sum(),
                None => 0.0,
            };
            onset_fn.push(flux);

            prev_spectrum = Some(spectrum);
            frame_start += self.hop_size;
        }

        let mut onset_fn = smooth(&onset_fn);
        let max = onset_fn.iter().cloned().fold(0.0f32, f32::max);
        if max > 0.0 {
            for v in &mut onset_fn {
                *v /= max;
            }
        }
        onset_fn
    }

    fn onset_peaks(&self, onset_fn: &[f32]) -> Vec<usize> {
        if onset_fn.len() < 3 {
            return Vec::new();
        }
        let mean: f32 = onset_fn.iter().sum::<f32>() / onset_fn.len() as f32;
        let variance: f32 =
            onset_fn.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / onset_fn.len() as f32;
        let threshold = (mean + 0.5 * variance.sqrt()).max(0.1);

        // 50 ms between peaks
        let min_distance = ((self.sample_rate as f32 * 0.05) as usize / self.hop_size).max(1);

        let mut peaks = Vec::new();
        let mut last_peak: isize = -(min_distance as isize);
        for i in 1..onset_fn.len() - 1 {
            if onset_fn[i] > threshold
                && onset_fn[i] > onset_fn[i - 1]
                && onset_fn[i] >= onset_fn[i + 1]
                && (i as isize - last_peak) >= min_distance as isize
            {
                peaks.push(i);
                last_peak = i as isize;
            }
        }
        peaks
    }

    fn correlation_at_lag(onset_fn: &[f32], lag: usize) -> f32 {
        if lag == 0 || lag >= onset_fn.len() {
            return 0.0;
        }
        let mut correlation = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for i in 0..(onset_fn.len() - lag) {
            correlation += onset_fn[i] * onset_fn[i + lag];
            norm_a += onset_fn[i] * onset_fn[i];
            norm_b += onset_fn[i + lag] * onset_fn[i + lag];
        }
        let norm = (norm_a * norm_b).sqrt();
        if norm > 0.0 {
            correlation / norm
        } else {
            0.0
        }
    }

    fn estimate_bpm(&self, onset_fn: &[f32]) -> Option<(f32, f32)> {
        let fps = self.frames_per_second();
        let min_lag = ((fps * 60.0 / MAX_BPM) as usize).max(1);
        let max_lag = (fps * 60.0 / MIN_BPM) as usize;

        if onset_fn.len() < 2 * max_lag {
            return None;
        }

        let mut best_lag = 0;
        let mut best_correlation = 0.0f32;
        for lag in min_lag..=max_lag {
            let correlation = Self::correlation_at_lag(onset_fn, lag);
            if correlation > best_correlation {
                best_correlation = correlation;
                best_lag = lag;
            }
        }
        if best_lag == 0 || best_correlation <= 0.0 {
            return None;
        }

        let bpm = 60.0 * fps / best_lag as f32;
        let bpm = self.disambiguate_octave(onset_fn, bpm, fps);
        Some((bpm, best_correlation.clamp(0.0, 1.0)))
    }

    /// Correlation at a fractional lag: the better of the two integer lags
    /// around it.
    fn correlation_near(onset_fn: &[f32], lag: f32) -> f32 {
        let lo = lag.floor() as usize;
        Self::correlation_at_lag(onset_fn, lo).max(Self::correlation_at_lag(onset_fn, lo + 1))
    }

    /// Prefer the faster of two octave-related tempi when it still
    /// correlates at 70% of the slower one.
    fn disambiguate_octave(&self, onset_fn: &[f32], bpm: f32, fps: f32) -> f32 {
        if !(MIN_BPM..=100.0).contains(&bpm) {
            return bpm;
        }
        let doubled = bpm * 2.0;
        if doubled > MAX_BPM {
            return bpm;
        }
        let corr = Self::correlation_near(onset_fn, fps * 60.0 / bpm);
        let doubled_corr = Self::correlation_near(onset_fn, fps * 60.0 / doubled);
        if doubled_corr > corr * 0.7 {
            doubled
        } else {
            bpm
        }
    }

    /// Walk a beat grid from the best-aligned onset, snapping each expected
    /// beat to a nearby onset peak when one exists.
    fn beat_times(&self, peaks: &[usize], n_frames: usize, bpm: f32) -> Vec<f64> {
        let fps = self.frames_per_second() as f64;
        let interval = fps * 60.0 / bpm as f64;
        if peaks.is_empty() || interval < 1.0 {
            return Vec::new();
        }
        let tolerance = interval / 6.0;

        let first = self.first_beat(peaks, interval, tolerance);
        let mut beats = Vec::new();
        let mut expected = first as f64;
        while expected < n_frames as f64 {
            let snapped = peaks
                .iter()
                .map(|&p| p as f64)
                .filter(|p| (p - expected).abs() <= tolerance)
                .min_by(|a, b| (a - expected).abs().total_cmp(&(b - expected).abs()))
                .unwrap_or(expected);
            beats.push(snapped);
            expected = snapped + interval;
        }

        beats.into_iter().map(|frame| frame / fps).collect()
    }

    fn first_beat(&self, peaks: &[usize], interval: f64, tolerance: f64) -> usize {
        let candidates = peaks.len().min(32);
        let mut best = peaks[0];
        let mut best_score = 0.0f64;
        for &onset in &peaks[..candidates] {
            let mut score = 0.0;
            for beat_num in 0..16 {
                let expected = onset as f64 + beat_num as f64 * interval;
                if peaks.iter().any(|&p| (p as f64 - expected).abs() <= tolerance) {
                    score += 1.0 / (beat_num as f64 + 1.0);
                }
            }
            if score > best_score {
                best_score = score;
                best = onset;
            }
        }
        best
    }
}
